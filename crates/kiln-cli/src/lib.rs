//! # kiln-cli
//!
//! Command-line interface for the Kiln tool execution core.
//!
//! ## Commands
//!
//! - `kiln run` — Read JSON tool calls from stdin, answer on stdout
//! - `kiln tools` — Print the tool schemas
//! - `kiln config` — Show the effective configuration

pub mod commands;

pub use commands::{Cli, exit_code};
