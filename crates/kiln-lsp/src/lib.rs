//! # kiln-lsp
//!
//! A small Language Server Protocol client and the diagnostics collector
//! built on it.
//!
//! ## Architecture
//!
//! - **Transport**: `Content-Length` framed JSON-RPC over the server's stdio.
//! - **Client**: one per language server. A background reader task routes
//!   responses to pending requests, answers server-to-client requests with
//!   defaults, and keeps the latest `publishDiagnostics` per URI.
//! - **Collector**: the pool of clients keyed by language name. Mutating
//!   tools call [`DiagnosticsCollector::wait_for_diagnostics`] after a write
//!   and [`DiagnosticsCollector::render`] to report what the servers found.

pub mod client;
pub mod collector;
pub mod language;
pub mod protocol;
pub mod render;
pub mod transport;

pub use client::LspClient;
pub use collector::{DEFAULT_WAIT_TIMEOUT, DiagnosticsCollector};
pub use language::detect_language_id;
pub use protocol::{Diagnostic, DiagnosticSeverity, DiagnosticTag, Position, Range};
pub use render::render_diagnostics;
