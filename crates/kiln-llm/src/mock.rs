//! Mock provider for deterministic testing.
//!
//! Returns pre-configured responses without making any HTTP calls.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

use crate::provider::*;
use kiln_core::{KilnError, Message, MessageContent, Result, Role, ToolCall};

/// A mock provider that replays queued responses in order.
///
/// # Example
/// ```
/// use kiln_llm::MockProvider;
/// let provider = MockProvider::new("test")
///     .with_tool_call("ls", serde_json::json!({"path": "/tmp"}))
///     .with_response("done");
/// ```
pub struct MockProvider {
    responses: Mutex<VecDeque<MockResponse>>,
    /// Every request received, for assertions in tests.
    pub requests: Arc<Mutex<Vec<LlmRequest>>>,
    name: String,
}

/// A pre-configured response from the mock provider.
#[derive(Clone, Default)]
pub struct MockResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    /// If set, the provider returns this error instead.
    pub error: Option<String>,
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Arc::new(Mutex::new(vec![])),
            name: name.into(),
        }
    }

    /// Queue a plain text answer.
    pub fn with_response(self, text: &str) -> Self {
        self.responses.lock().push_back(MockResponse {
            text: text.to_string(),
            ..Default::default()
        });
        self
    }

    /// Queue a turn that calls one tool.
    pub fn with_tool_call(self, name: &str, input: serde_json::Value) -> Self {
        let n = self.responses.lock().len();
        self.responses.lock().push_back(MockResponse {
            tool_calls: vec![ToolCall::new(format!("call_{n}"), name, input.to_string())],
            ..Default::default()
        });
        self
    }

    pub fn with_error(self, error: &str) -> Self {
        self.responses.lock().push_back(MockResponse {
            error: Some(error.to_string()),
            ..Default::default()
        });
        self
    }

    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().clone()
    }

    fn next_response(&self) -> MockResponse {
        self.responses.lock().pop_front().unwrap_or_else(|| MockResponse {
            text: "(mock: no more queued responses)".to_string(),
            ..Default::default()
        })
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        self.requests.lock().push(request.clone());
        let mock = self.next_response();
        debug!(
            provider = %self.name,
            messages = request.messages.len(),
            tool_calls = mock.tool_calls.len(),
            "mock completion"
        );

        if let Some(error) = mock.error {
            return Err(KilnError::LlmProvider(error));
        }

        let session = request
            .messages
            .first()
            .map(|m| m.session_id)
            .unwrap_or_default();
        let mut msg = Message::text(session, Role::Assistant, "");
        msg.content = if mock.text.is_empty() {
            vec![]
        } else {
            vec![MessageContent::Text { text: mock.text }]
        };
        let has_tool_calls = !mock.tool_calls.is_empty();
        msg.tool_calls = mock.tool_calls;

        Ok(LlmResponse {
            message: msg,
            usage: Usage {
                input_tokens: 100,
                output_tokens: 50,
            },
            has_tool_calls,
            stop_reason: if has_tool_calls {
                StopReason::ToolUse
            } else {
                StopReason::EndTurn
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> LlmRequest {
        LlmRequest {
            model: "test".into(),
            messages: vec![],
            tools: vec![],
            system: None,
            max_tokens: 100,
        }
    }

    #[tokio::test]
    async fn test_mock_text_response() {
        let provider = MockProvider::new("mock").with_response("Hello!");
        let resp = provider.complete(&request()).await.unwrap();
        assert_eq!(resp.message.text_content(), "Hello!");
        assert_eq!(resp.stop_reason, StopReason::EndTurn);
        assert!(!resp.has_tool_calls);
    }

    #[tokio::test]
    async fn test_mock_tool_call_then_exhausted() {
        let provider = MockProvider::new("mock").with_tool_call("ls", serde_json::json!({}));
        let resp = provider.complete(&request()).await.unwrap();
        assert!(resp.has_tool_calls);
        assert_eq!(resp.message.tool_calls[0].name, "ls");
        let resp = provider.complete(&request()).await.unwrap();
        assert!(resp.message.text_content().contains("no more queued"));
        assert_eq!(provider.recorded_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_error() {
        let provider = MockProvider::new("mock").with_error("boom");
        assert!(provider.complete(&request()).await.is_err());
    }
}
