use async_trait::async_trait;
use kiln_core::{Message, Result, ToolInfo};
use serde::{Deserialize, Serialize};

/// A request to a model provider.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Model identifier, e.g. "anthropic/claude-sonnet-4".
    pub model: String,
    /// Conversation history.
    pub messages: Vec<Message>,
    /// Tools the model may call.
    pub tools: Vec<ToolInfo>,
    /// System prompt, kept apart from messages for providers that support it.
    pub system: Option<String>,
    pub max_tokens: u32,
}

/// A complete response from the model.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub message: Message,
    pub usage: Usage,
    /// Whether the model wants tool results before continuing.
    pub has_tool_calls: bool,
    pub stop_reason: StopReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

/// Token usage statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    pub fn merge(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Implemented by the host for each model backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Human-readable name, e.g. "Anthropic".
    fn name(&self) -> &str;

    /// Send a non-streaming request.
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse>;
}
