use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use kiln_config::AgentConfig;
use kiln_core::{Result, Tool, ToolCall, ToolContext, ToolInfo, ToolResponse};
use kiln_llm::LlmProvider;

use super::{decode_params, read_only_tools, tool_info};
use crate::registry::ToolRegistry;
use crate::services::ToolServices;
use crate::sub_agent::SubAgent;

pub const NAME: &str = "agent";

const DESCRIPTION: &str = "Launch a new agent that has access to the following tools: bash, ls, \
glob, view. Use it when searching for a keyword or file and you are not confident the first \
try will find the right match, for example a question like \"which file does X?\".

Usage notes:
1. Launch multiple agents concurrently whenever possible, using a single message with multiple \
tool uses.
2. When the agent is done it returns a single message. The result is not shown to the user; \
summarize it for them yourself.
3. Each invocation is stateless. Give a detailed task description and say exactly what \
information the agent should report back.
4. The agent cannot modify files. Make edits yourself.";

#[derive(Debug, Deserialize)]
struct AgentParams {
    #[serde(default)]
    prompt: String,
}

#[derive(Debug, Serialize)]
struct AgentMetadata {
    iterations: u32,
    input_tokens: u32,
    output_tokens: u32,
    exhausted: bool,
}

pub struct AgentTool {
    agent: SubAgent,
}

impl AgentTool {
    /// An agent tool whose runs use `agent`'s model settings and the
    /// read-only tool set.
    pub fn new(
        services: Arc<ToolServices>,
        provider: Arc<dyn LlmProvider>,
        agent: &AgentConfig,
    ) -> Self {
        let tools = ToolRegistry::with_tools(read_only_tools(&services));
        Self {
            agent: SubAgent::new(provider, tools, agent, services.working_dir.clone()),
        }
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn info(&self) -> ToolInfo {
        tool_info(
            NAME,
            DESCRIPTION,
            json!({
                "prompt": {
                    "type": "string",
                    "description": "The task for the agent to perform"
                }
            }),
            &["prompt"],
        )
    }

    async fn run(&self, ctx: &ToolContext, call: &ToolCall) -> Result<ToolResponse> {
        let params: AgentParams = match decode_params(call) {
            Ok(p) => p,
            Err(resp) => return Ok(resp),
        };
        if params.prompt.is_empty() {
            return Ok(ToolResponse::error("prompt is required"));
        }

        let outcome = self.agent.run(ctx, &params.prompt).await?;
        let metadata = AgentMetadata {
            iterations: outcome.iterations,
            input_tokens: outcome.usage.input_tokens,
            output_tokens: outcome.usage.output_tokens,
            exhausted: outcome.exhausted,
        };
        Ok(ToolResponse::text(outcome.text).with_metadata(metadata))
    }
}
