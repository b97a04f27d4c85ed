//! # kiln-autonomy
//!
//! Human-in-the-loop consent for side-effecting tool calls. The
//! [`PermissionBroker`] publishes every request on an event bus and blocks
//! the calling tool until the UI answers; [`CommandPolicy`] decides which
//! shell commands are refused outright, which are read-only enough to skip
//! the broker, and which need consent.

pub mod permission;
pub mod policy;

pub use permission::{
    permission_path, CreatePermissionRequest, PermissionBroker, PermissionDecision, PermissionRequest,
};
pub use policy::{CommandPolicy, CommandVerdict};
