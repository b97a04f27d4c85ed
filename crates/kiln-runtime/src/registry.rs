use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use kiln_core::{KilnError, Result, Tool, ToolCall, ToolContext, ToolInfo, ToolResponse};

/// Tools by name, and the single entry point that dispatches a model's
/// call to one of them.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tools(tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        let mut registry = Self::new();
        for tool in tools {
            registry.register(tool);
        }
        registry
    }

    /// Add a tool, replacing (and returning) any tool of the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Option<Arc<dyn Tool>> {
        let name = tool.info().name;
        self.tools.insert(name, tool)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schemas of every registered tool, sorted by name.
    pub fn infos(&self) -> Vec<ToolInfo> {
        self.tools.values().map(|t| t.info()).collect()
    }

    /// Run one call. Parameter and precondition problems come back as
    /// `Ok` responses with `is_error` set; permission denials,
    /// cancellation and infrastructure failures come back as `Err`.
    pub async fn invoke(&self, ctx: &ToolContext, call: &ToolCall) -> Result<ToolResponse> {
        let Some(tool) = self.tools.get(&call.name) else {
            warn!(tool = %call.name, session_id = %ctx.session_id, "unknown tool");
            return Err(KilnError::ToolNotFound(call.name.clone()));
        };
        if ctx.cancel.is_cancelled() {
            return Err(KilnError::Cancelled);
        }

        debug!(tool = %call.name, call_id = %call.id, session_id = %ctx.session_id, "invoking tool");
        let started = Instant::now();
        let outcome = tool.run(ctx, call).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(response) => info!(
                tool = %call.name,
                session_id = %ctx.session_id,
                is_error = response.is_error,
                elapsed_ms,
                "tool finished"
            ),
            Err(e) => warn!(
                tool = %call.name,
                session_id = %ctx.session_id,
                category = e.category(),
                error = %e,
                elapsed_ms,
                "tool failed"
            ),
        }
        outcome
    }
}

/// The response the model sees for an error that stopped a call.
pub fn error_response(error: &KilnError) -> ToolResponse {
    ToolResponse::error(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kiln_core::ToolContext;
    use serde_json::json;
    use uuid::Uuid;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn info(&self) -> ToolInfo {
            ToolInfo {
                name: "echo".into(),
                description: "echo the input".into(),
                parameters: json!({}),
                required: vec![],
            }
        }

        async fn run(&self, _ctx: &ToolContext, call: &ToolCall) -> Result<ToolResponse> {
            Ok(ToolResponse::text(call.input.clone()))
        }
    }

    #[tokio::test]
    async fn dispatches_by_name() {
        let registry = ToolRegistry::with_tools([Arc::new(Echo) as Arc<dyn Tool>]);
        let ctx = ToolContext::new(Uuid::new_v4());
        let resp = registry
            .invoke(&ctx, &ToolCall::new("1", "echo", "hi"))
            .await
            .unwrap();
        assert_eq!(resp.content, "hi");
        assert_eq!(registry.names(), vec!["echo".to_string()]);
    }

    #[tokio::test]
    async fn unknown_tool_and_cancelled_context() {
        let registry = ToolRegistry::with_tools([Arc::new(Echo) as Arc<dyn Tool>]);
        let ctx = ToolContext::new(Uuid::new_v4());
        let err = registry
            .invoke(&ctx, &ToolCall::new("1", "nope", "{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, KilnError::ToolNotFound(ref n) if n == "nope"));

        ctx.cancel.cancel();
        let err = registry
            .invoke(&ctx, &ToolCall::new("2", "echo", "{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, KilnError::Cancelled));
    }
}
