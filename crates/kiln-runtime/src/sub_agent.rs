//! Inner model runs for the `agent` tool.
//!
//! A sub-agent gets a prompt, a restricted registry and its own
//! conversation. It loops model turn → tool calls → tool results until the
//! model answers without calling a tool or the iteration cap is hit, and
//! hands back only its final text.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use kiln_config::AgentConfig;
use kiln_core::{KilnError, Message, Result, Role, ToolContext, ToolResponse};
use kiln_llm::{LlmProvider, LlmRequest, Usage};

use crate::registry::{ToolRegistry, error_response};

const TASK_PROMPT: &str = "You are a search agent working inside a user's project. Given the \
user's prompt, use the tools available to you to answer the question.
Notes:
1. IMPORTANT: Be concise, direct, and to the point. Answer the question directly, without \
introductions, conclusions or restating the question.
2. When relevant, share file names and code snippets relevant to the query.
3. Any file paths you return in your final response MUST be absolute.
4. You cannot modify files. Report what you found and let the caller act on it.";

/// What a finished sub-agent run produced.
#[derive(Debug, Clone, Default)]
pub struct SubAgentOutcome {
    /// Text of the last assistant message that had any.
    pub text: String,
    pub usage: Usage,
    pub iterations: u32,
    /// Whether the run stopped at the iteration cap.
    pub exhausted: bool,
}

pub struct SubAgent {
    provider: Arc<dyn LlmProvider>,
    tools: ToolRegistry,
    model: String,
    max_tokens: u32,
    max_iterations: u32,
    working_dir: PathBuf,
}

impl SubAgent {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: ToolRegistry,
        agent: &AgentConfig,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            provider,
            tools,
            model: agent.model.clone(),
            max_tokens: agent.max_tokens,
            max_iterations: agent.max_iterations.max(1),
            working_dir: working_dir.into(),
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn system_prompt(&self) -> String {
        format!("{TASK_PROMPT}\n\n{}", environment_info(&self.working_dir))
    }

    /// Run to completion. Tool calls of one turn execute concurrently.
    ///
    /// A tool error the model can recover from is fed back as an error
    /// result; anything fatal (denied permission, cancellation, an
    /// infrastructure failure) ends the run with that error.
    pub async fn run(&self, ctx: &ToolContext, prompt: &str) -> Result<SubAgentOutcome> {
        let tool_ctx = ctx.child();
        let session = ctx.session_id;
        let mut messages = vec![Message::text(session, Role::User, prompt)];
        let mut outcome = SubAgentOutcome::default();

        info!(session_id = %session, model = %self.model, "sub-agent started");
        while outcome.iterations < self.max_iterations {
            if ctx.cancel.is_cancelled() {
                return Err(KilnError::Cancelled);
            }
            outcome.iterations += 1;

            let request = LlmRequest {
                model: self.model.clone(),
                messages: messages.clone(),
                tools: self.tools.infos(),
                system: Some(self.system_prompt()),
                max_tokens: self.max_tokens,
            };
            let response = tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(KilnError::Cancelled),
                res = self.provider.complete(&request) => res?,
            };
            outcome.usage.merge(&response.usage);

            let text = response.message.text_content();
            if !text.is_empty() {
                outcome.text = text;
            }
            let calls = response.message.tool_calls.clone();
            messages.push(response.message);
            if calls.is_empty() {
                info!(
                    session_id = %session,
                    iterations = outcome.iterations,
                    tokens = outcome.usage.total_tokens(),
                    "sub-agent finished"
                );
                return Ok(outcome);
            }

            debug!(session_id = %session, calls = calls.len(), "sub-agent calling tools");
            let results = join_all(calls.iter().map(|call| self.tools.invoke(&tool_ctx, call))).await;
            for (call, result) in calls.iter().zip(results) {
                let response: ToolResponse = match result {
                    Ok(response) => response,
                    Err(e) if !e.is_fatal() => error_response(&e),
                    Err(e) => return Err(e),
                };
                messages.push(Message::tool_result(
                    session,
                    call.id.clone(),
                    response.content,
                    response.is_error,
                ));
            }
        }

        warn!(
            session_id = %session,
            max_iterations = self.max_iterations,
            "sub-agent hit its iteration cap"
        );
        outcome.exhausted = true;
        Ok(outcome)
    }
}

fn environment_info(working_dir: &Path) -> String {
    let is_git = working_dir.join(".git").exists();
    format!(
        "Here is useful information about the environment you are running in:\n<env>\n\
         Working directory: {}\nIs directory a git repo: {}\nPlatform: {}\nToday's date: {}\n</env>",
        working_dir.display(),
        if is_git { "yes" } else { "no" },
        std::env::consts::OS,
        chrono::Local::now().format("%Y-%m-%d"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_block() {
        let dir = tempfile::tempdir().unwrap();
        let info = environment_info(dir.path());
        assert!(info.contains(&format!("Working directory: {}", dir.path().display())));
        assert!(info.contains("Is directory a git repo: no"));
        assert!(info.contains(&format!("Platform: {}", std::env::consts::OS)));
        assert!(info.starts_with("Here is useful information"));
        assert!(info.ends_with("</env>"));
    }
}
