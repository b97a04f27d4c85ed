use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use kiln_autonomy::CommandVerdict;
use kiln_core::{KilnError, Result, Tool, ToolCall, ToolContext, ToolInfo, ToolResponse};

use super::{decode_params, require_permission, tool_info};
use crate::services::ToolServices;
use crate::shell::truncate_output;

pub const NAME: &str = "bash";
pub const DEFAULT_TIMEOUT_MS: i64 = 60_000;
pub const MAX_TIMEOUT_MS: i64 = 600_000;

const DESCRIPTION: &str = "Executes a bash command in a persistent shell session. \
Environment variables, the working directory and shell state carry over between calls. \
Commands have no stdin; interactive programs will not work. \
Network fetchers such as curl and wget are not allowed; use the fetch tool instead. \
Output longer than 30000 characters is truncated in the middle. \
The timeout is in milliseconds, defaults to 60000 and is capped at 600000.";

#[derive(Debug, Deserialize)]
struct BashParams {
    #[serde(default)]
    command: String,
    #[serde(default)]
    timeout: i64,
}

#[derive(Debug, Serialize)]
struct BashMetadata {
    start_time: i64,
    end_time: i64,
    exit_code: i32,
    interrupted: bool,
}

/// Clamp a requested timeout: non-positive means the default.
fn effective_timeout(requested_ms: i64) -> Duration {
    let ms = if requested_ms <= 0 {
        DEFAULT_TIMEOUT_MS
    } else {
        requested_ms.min(MAX_TIMEOUT_MS)
    };
    Duration::from_millis(ms as u64)
}

/// Join stdout, stderr and the exit note into the text the model sees.
fn compose_output(stdout: String, stderr: &str, exit_code: i32, interrupted: bool) -> String {
    let mut error_message = stderr.to_string();
    let note = if interrupted {
        Some("Command was aborted before completion".to_string())
    } else if exit_code != 0 {
        Some(format!("Exit code {exit_code}"))
    } else {
        None
    };
    if let Some(note) = note {
        if !error_message.is_empty() {
            error_message.push('\n');
        }
        error_message.push_str(&note);
    }

    let mut out = stdout;
    if !out.is_empty() && !stderr.is_empty() {
        out.push('\n');
    }
    if !error_message.is_empty() {
        out.push('\n');
        out.push_str(&error_message);
    }
    if out.is_empty() {
        out = "no output".to_string();
    }
    out
}

pub struct BashTool {
    services: Arc<ToolServices>,
}

impl BashTool {
    pub fn new(services: Arc<ToolServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn info(&self) -> ToolInfo {
        tool_info(
            NAME,
            DESCRIPTION,
            json!({
                "command": {
                    "type": "string",
                    "description": "The command to execute"
                },
                "timeout": {
                    "type": "number",
                    "description": "Optional timeout in milliseconds (max 600000)"
                }
            }),
            &["command"],
        )
    }

    async fn run(&self, ctx: &ToolContext, call: &ToolCall) -> Result<ToolResponse> {
        let params: BashParams = match decode_params(call) {
            Ok(p) => p,
            Err(_) => return Ok(ToolResponse::error("invalid parameters")),
        };
        if params.command.trim().is_empty() {
            return Ok(ToolResponse::error("missing command"));
        }

        match self.services.policy.evaluate(&params.command) {
            CommandVerdict::Deny(reason) => return Ok(ToolResponse::error(reason)),
            CommandVerdict::Allow => {}
            CommandVerdict::Escalate => {
                require_permission(
                    &self.services,
                    ctx,
                    NAME,
                    "execute",
                    self.services.working_dir.display().to_string(),
                    format!("Execute command: {}", params.command),
                    json!({ "command": params.command }),
                )
                .await?;
            }
        }

        let timeout = effective_timeout(params.timeout);
        info!(command = %params.command, timeout_ms = timeout.as_millis() as u64, "running bash command");

        let start_time = Utc::now().timestamp_millis();
        let shell = self.services.shells.get(&self.services.working_dir);
        let output = shell
            .exec(&ctx.cancel, &params.command, timeout)
            .await
            .map_err(|e| match e {
                KilnError::Shell(reason) => {
                    KilnError::Shell(format!("error executing command: {reason}"))
                }
                other => other,
            })?;
        let end_time = Utc::now().timestamp_millis();

        let stdout = truncate_output(&output.stdout);
        let stderr = truncate_output(&output.stderr);
        let content = compose_output(stdout, &stderr, output.exit_code, output.interrupted);

        Ok(ToolResponse::text(content).with_metadata(BashMetadata {
            start_time,
            end_time,
            exit_code: output.exit_code,
            interrupted: output.interrupted,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_defaults_and_caps() {
        assert_eq!(effective_timeout(0), Duration::from_millis(60_000));
        assert_eq!(effective_timeout(-5), Duration::from_millis(60_000));
        assert_eq!(effective_timeout(1_500), Duration::from_millis(1_500));
        assert_eq!(effective_timeout(9_999_999), Duration::from_millis(600_000));
    }

    #[test]
    fn output_assembly() {
        assert_eq!(compose_output(String::new(), "", 0, false), "no output");
        assert_eq!(compose_output("hi".into(), "", 0, false), "hi");
        assert_eq!(compose_output("hi".into(), "", 2, false), "hi\nExit code 2");
        assert_eq!(
            compose_output("out".into(), "err", 1, false),
            "out\n\nerr\nExit code 1"
        );
        assert_eq!(
            compose_output(String::new(), "", 143, true),
            "\nCommand was aborted before completion"
        );
    }
}
