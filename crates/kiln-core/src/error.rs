use thiserror::Error;

/// Unified error type for the Kiln tool execution core.
///
/// Model-correctable problems (bad parameters, stale reads, ambiguous
/// matches) are not errors: tools report them as a [`crate::ToolResponse`]
/// with `is_error = true`. Everything in this enum propagates to the agent
/// loop.
#[derive(Error, Debug)]
pub enum KilnError {
    // ── Tool errors ────────────────────────────────────────────
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool execution failed: {tool}: {reason}")]
    ToolExecution { tool: String, reason: String },

    // ── Permission / cancellation ──────────────────────────────
    #[error("permission denied")]
    PermissionDenied,

    #[error("operation cancelled")]
    Cancelled,

    // ── Shell errors ───────────────────────────────────────────
    #[error("shell error: {0}")]
    Shell(String),

    // ── Language server errors ─────────────────────────────────
    #[error("lsp error: {server}: {reason}")]
    Lsp { server: String, reason: String },

    #[error("lsp request timed out: {method}")]
    LspTimeout { method: String },

    // ── History errors ─────────────────────────────────────────
    #[error("history file not found: {0}")]
    HistoryNotFound(String),

    #[error("history version conflict: {path} already has {version}")]
    HistoryConflict { path: String, version: String },

    // ── Patch errors ───────────────────────────────────────────
    #[error("patch partially applied: {0}")]
    PatchPartial(String),

    // ── LLM errors ─────────────────────────────────────────────
    #[error("llm provider error: {0}")]
    LlmProvider(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    // ── Network errors ─────────────────────────────────────────
    #[error("http error: {0}")]
    Http(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl KilnError {
    /// Whether the agent loop should stop the current turn on this error.
    ///
    /// Permission denials and cancellations always halt; external failures
    /// halt too, except a missing tool which the model can recover from.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, KilnError::ToolNotFound(_))
    }

    /// Short machine-readable category used in logs and CLI envelopes.
    pub fn category(&self) -> &'static str {
        match self {
            KilnError::PermissionDenied => "permission_denied",
            KilnError::Cancelled => "cancelled",
            KilnError::ToolNotFound(_) => "tool_not_found",
            KilnError::Config(_) | KilnError::ConfigValidation { .. } => "config",
            _ => "external_failure",
        }
    }
}

pub type Result<T> = std::result::Result<T, KilnError>;
