use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use kiln_core::{Result, Tool, ToolCall, ToolContext, ToolInfo, ToolResponse};

use super::{
    check_fresh_read, check_unchanged, decode_params, diagnostics_for, file_scope, record_access,
    record_history, require_permission, result_block, tool_info,
};
use crate::diff;
use crate::services::ToolServices;

pub const NAME: &str = "write";

const DESCRIPTION: &str = "Creates a file or replaces its entire content. Parent directories are \
created as needed. An existing file must be viewed first and must not have changed since; \
prefer edit or patch for small changes to existing files.";

#[derive(Debug, Deserialize)]
struct WriteParams {
    #[serde(default)]
    file_path: String,
    #[serde(default)]
    content: String,
}

/// Diff and line counts attached to every successful mutation.
#[derive(Debug, Serialize)]
pub(crate) struct ChangeMetadata {
    pub diff: String,
    pub additions: usize,
    pub removals: usize,
}

impl From<diff::GeneratedDiff> for ChangeMetadata {
    fn from(d: diff::GeneratedDiff) -> Self {
        Self {
            diff: d.patch,
            additions: d.additions,
            removals: d.removals,
        }
    }
}

pub struct WriteTool {
    services: Arc<ToolServices>,
}

impl WriteTool {
    pub fn new(services: Arc<ToolServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Tool for WriteTool {
    fn info(&self) -> ToolInfo {
        tool_info(
            NAME,
            DESCRIPTION,
            json!({
                "file_path": {
                    "type": "string",
                    "description": "The path to the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write to the file"
                }
            }),
            &["file_path", "content"],
        )
    }

    async fn run(&self, ctx: &ToolContext, call: &ToolCall) -> Result<ToolResponse> {
        let params: WriteParams = match decode_params(call) {
            Ok(p) => p,
            Err(resp) => return Ok(resp),
        };
        if params.file_path.is_empty() {
            return Ok(ToolResponse::error("file_path is required"));
        }
        let path = self.services.resolve_path(&params.file_path);

        let old = match std::fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => {
                return Ok(ToolResponse::error(format!(
                    "path is a directory, not a file: {}",
                    path.display()
                )));
            }
            Ok(meta) => {
                if let Some(resp) = check_fresh_read(&self.services, &path, meta.modified()?, "writing")
                {
                    return Ok(resp);
                }
                let existing = std::fs::read_to_string(&path)?;
                if existing == params.content {
                    return Ok(ToolResponse::error(format!(
                        "File {} already contains the exact content. No changes made.",
                        path.display()
                    )));
                }
                Some(existing)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let d = diff::generate(
            old.as_deref().unwrap_or_default(),
            &params.content,
            &path.display().to_string(),
        );
        let description = if old.is_some() {
            format!("Write to file {}", path.display())
        } else {
            format!("Create file {}", path.display())
        };
        require_permission(
            &self.services,
            ctx,
            NAME,
            "write",
            file_scope(&self.services, &path),
            description,
            json!({ "file_path": path.display().to_string(), "diff": d.patch }),
        )
        .await?;

        if let Some(resp) = check_unchanged(&self.services, &path, old.as_deref(), "writing")? {
            return Ok(resp);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, &params.content)?;
        info!(path = %path.display(), bytes = params.content.len(), "file written");

        record_history(&self.services, ctx.session_id, &path, old.as_deref(), &params.content);
        record_access(&self.services, &path);

        let diagnostics = diagnostics_for(&self.services, ctx, &path).await;
        let message = format!("File written: {}", path.display());
        Ok(ToolResponse::text(result_block(&message, &diagnostics))
            .with_metadata(ChangeMetadata::from(d)))
    }
}
