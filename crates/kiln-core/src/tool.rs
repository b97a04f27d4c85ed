use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::session::SessionId;

/// Description of a tool that the model may call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    /// Unique name, e.g. "view", "bash", "multi_patch".
    pub name: String,
    /// Human-readable description for the model.
    pub description: String,
    /// JSON Schema `properties` object of the input.
    pub parameters: Value,
    /// Names of required properties.
    #[serde(default)]
    pub required: Vec<String>,
}

impl ToolInfo {
    /// Full JSON Schema object for the tool input.
    pub fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": self.parameters,
            "required": self.required,
        })
    }
}

/// A request from the model to call a tool. `input` is the JSON-encoded
/// argument object exactly as the model produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(deserialize_with = "input_as_string")]
    pub input: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input: input.into(),
        }
    }

    /// Decode the input into a tool's typed parameters. Blank input decodes
    /// as an empty object.
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        if self.input.trim().is_empty() {
            serde_json::from_str("{}")
        } else {
            serde_json::from_str(&self.input)
        }
    }
}

/// Accept `input` either as a JSON string or as an inline object.
fn input_as_string<'de, D>(de: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(de)? {
        Value::String(s) => Ok(s),
        Value::Null => Ok(String::new()),
        other => Ok(other.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    Text,
    Image,
}

/// The envelope every tool returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    #[serde(rename = "type")]
    pub kind: ResponseKind,
    pub content: String,
    pub is_error: bool,
    /// Tool-specific structured data, opaque to the invoker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::Text,
            content: content.into(),
            is_error: false,
            metadata: None,
        }
    }

    /// A failure the model should see and correct.
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::Text,
            content: content.into(),
            is_error: true,
            metadata: None,
        }
    }

    pub fn image(content: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::Image,
            content: content.into(),
            is_error: false,
            metadata: None,
        }
    }

    pub fn with_metadata<M: Serialize>(mut self, metadata: M) -> Self {
        self.metadata = serde_json::to_value(metadata).ok();
        self
    }
}

/// Per-call context: which session the call belongs to and its
/// cancellation signal.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: SessionId,
    pub message_id: Option<String>,
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            message_id: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(session_id: SessionId, cancel: CancellationToken) -> Self {
        Self {
            session_id,
            message_id: None,
            cancel,
        }
    }

    /// A context that is cancelled together with this one.
    pub fn child(&self) -> Self {
        Self {
            session_id: self.session_id,
            message_id: self.message_id.clone(),
            cancel: self.cancel.child_token(),
        }
    }
}

/// A typed, schema-described primitive the model may invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn info(&self) -> ToolInfo;

    /// Run one call. Parameter and precondition problems come back as
    /// `Ok(ToolResponse::error(..))`; `Err` is reserved for failures that
    /// should stop the agent turn.
    async fn run(&self, ctx: &ToolContext, call: &ToolCall) -> crate::Result<ToolResponse>;
}
