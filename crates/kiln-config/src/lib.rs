//! # kiln-config
//!
//! Configuration for Kiln. Reads `~/.kiln.yaml` (or `KILN_CONFIG`, or an
//! explicit path), then applies `KILN_*` environment overrides.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::{
    AgentConfig, ConfigWarning, KilnConfig, LspConfig, ProviderConfig, SearchConfig, ShellConfig,
    WarningSeverity,
};
