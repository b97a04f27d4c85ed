//! # kiln-core
//!
//! Core types, traits, and shared services for the Kiln tool execution core.
//! Every other crate in the workspace speaks this vocabulary: the tool wire
//! format, the error taxonomy, the generic event broker, and the per-agent
//! bookkeeping services (file-access ledger, file history, session todos).

pub mod error;
pub mod event;
pub mod history;
pub mod ledger;
pub mod message;
pub mod session;
pub mod tool;

pub use error::{KilnError, Result};
pub use event::{Broker, Event, EventKind, Subscription};
pub use history::{HistoryFile, HistoryService};
pub use ledger::{FileLedger, FileRecord};
pub use message::{Message, MessageContent, Role};
pub use session::{SessionId, SessionStore, TodoItem, TodoPriority, TodoStatus};
pub use tool::{ResponseKind, Tool, ToolCall, ToolContext, ToolInfo, ToolResponse};
