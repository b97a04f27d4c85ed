//! # kiln-runtime
//!
//! The tool layer: everything between a model's JSON tool call and the
//! filesystem, the shell and the language servers.
//!
//! ## Architecture
//!
//! ```text
//!        ToolCall (JSON)
//!              │
//!              ▼
//!      ┌───────────────┐
//!      │ ToolRegistry  │  ← name lookup, cancellation check, tracing
//!      └───────┬───────┘
//!              ▼
//!      ┌───────────────┐        ┌──────────────────┐
//!      │    Tool       │ ─────► │ PermissionBroker │
//!      │ view/edit/... │        └──────────────────┘
//!      └───────┬───────┘
//!              │ ToolServices
//!   ┌──────────┼────────────┬─────────────┬──────────────┐
//!   ▼          ▼            ▼             ▼              ▼
//! Ledger    History   PersistentShell  Diagnostics    HTTP client
//! ```
//!
//! One [`ToolServices`] is shared by every tool of an agent; tools hold
//! it behind an `Arc` and never reach for global state.

pub mod diff;
pub mod html;
pub mod registry;
pub mod services;
pub mod shell;
pub mod sub_agent;
pub mod tools;

pub use registry::{ToolRegistry, error_response};
pub use services::{ToolServices, USER_AGENT};
pub use shell::{ExecOutput, PersistentShell, ShellPool, ShellSettings};
pub use sub_agent::{SubAgent, SubAgentOutcome};
pub use tools::{builtin_tools, coder_tools, read_only_tools};
