use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use kiln_core::{Result, Tool, ToolCall, ToolContext, ToolInfo, ToolResponse};

use super::{decode_params, tool_info};
use crate::services::ToolServices;

pub const NAME: &str = "diagnostics";

const DESCRIPTION: &str = "Reports errors and warnings from the configured language servers. With \
file_path, the file is opened in the servers first and its diagnostics are listed separately \
from the rest of the project; without it, everything currently known is reported.";

#[derive(Debug, Deserialize)]
struct DiagnosticsParams {
    #[serde(default)]
    file_path: String,
}

pub struct DiagnosticsTool {
    services: Arc<ToolServices>,
}

impl DiagnosticsTool {
    pub fn new(services: Arc<ToolServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Tool for DiagnosticsTool {
    fn info(&self) -> ToolInfo {
        tool_info(
            NAME,
            DESCRIPTION,
            json!({
                "file_path": {
                    "type": "string",
                    "description": "The file to get diagnostics for (leave empty for project-wide diagnostics)"
                }
            }),
            &[],
        )
    }

    async fn run(&self, ctx: &ToolContext, call: &ToolCall) -> Result<ToolResponse> {
        let params: DiagnosticsParams = match decode_params(call) {
            Ok(p) => p,
            Err(resp) => return Ok(resp),
        };
        let collector = &self.services.diagnostics;
        if !collector.has_clients() {
            return Ok(ToolResponse::error("no LSP clients available"));
        }

        if params.file_path.is_empty() {
            return Ok(ToolResponse::text(collector.render(None)));
        }

        let path = self.services.resolve_path(&params.file_path);
        let fresh = collector.wait_for_diagnostics(&ctx.cancel, &path).await;
        debug!(path = %path.display(), fresh, "diagnostics collected");
        Ok(ToolResponse::text(collector.render(Some(&path))))
    }
}
