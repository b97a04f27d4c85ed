use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use kiln_core::{Result, Tool, ToolCall, ToolContext, ToolInfo, ToolResponse};

use super::write::ChangeMetadata;
use super::{
    check_fresh_read, check_unchanged, decode_params, diagnostics_for, file_scope, record_access,
    record_history, require_permission, result_block, tool_info,
};
use crate::diff;
use crate::services::ToolServices;

pub const NAME: &str = "patch";

const DESCRIPTION: &str = "Applies a unified diff to a single file. The patch needs file headers \
(--- a/path, +++ b/path), hunk headers (@@ -start,count +start,count @@) and enough unchanged \
context lines around each change to place it. The file must be viewed before it is patched and \
the patch must apply cleanly to its current content. Use multi_patch to change several files at \
once.";

#[derive(Debug, Deserialize)]
struct PatchParams {
    #[serde(default)]
    file_path: String,
    #[serde(default)]
    patch: String,
}

/// Apply `patch` to `content`, or the message the model should see.
fn patched_content(patch: &str, content: &str) -> std::result::Result<String, String> {
    let files = diff::parse(patch).map_err(|e| format!("failed to parse patch: {e}"))?;
    let mut with_hunks = files.iter().filter(|f| !f.hunks.is_empty());
    let Some(file) = with_hunks.next() else {
        return Ok(content.to_string());
    };
    if with_hunks.next().is_some() {
        return Err(format!(
            "failed to parse patch: {}",
            diff::DiffError::MultipleFiles
        ));
    }
    diff::apply_hunks(content, &file.hunks).map_err(|e| format!("failed to apply patch: {e}"))
}

pub struct PatchTool {
    services: Arc<ToolServices>,
}

impl PatchTool {
    pub fn new(services: Arc<ToolServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Tool for PatchTool {
    fn info(&self) -> ToolInfo {
        tool_info(
            NAME,
            DESCRIPTION,
            json!({
                "file_path": {
                    "type": "string",
                    "description": "The path to the file to modify"
                },
                "patch": {
                    "type": "string",
                    "description": "The unified diff patch to apply"
                }
            }),
            &["file_path", "patch"],
        )
    }

    async fn run(&self, ctx: &ToolContext, call: &ToolCall) -> Result<ToolResponse> {
        let params: PatchParams = match decode_params(call) {
            Ok(p) => p,
            Err(resp) => return Ok(resp),
        };
        if params.file_path.is_empty() {
            return Ok(ToolResponse::error("file_path is required"));
        }
        if params.patch.is_empty() {
            return Ok(ToolResponse::error("patch is required"));
        }
        let path = self.services.resolve_path(&params.file_path);

        let meta = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ToolResponse::error(format!("file not found: {}", path.display())));
            }
            Err(e) => return Err(e.into()),
        };
        if meta.is_dir() {
            return Ok(ToolResponse::error(format!(
                "path is a directory, not a file: {}",
                path.display()
            )));
        }
        if let Some(resp) = check_fresh_read(&self.services, &path, meta.modified()?, "patching") {
            return Ok(resp);
        }

        let content = std::fs::read_to_string(&path)?;
        let updated = match patched_content(&params.patch, &content) {
            Ok(u) => u,
            Err(message) => return Ok(ToolResponse::error(message)),
        };
        if updated == content {
            return Ok(ToolResponse::error(
                "patch did not result in any changes to the file",
            ));
        }

        let d = diff::generate(&content, &updated, &path.display().to_string());
        require_permission(
            &self.services,
            ctx,
            NAME,
            "patch",
            file_scope(&self.services, &path),
            format!("Apply patch to file {}", path.display()),
            json!({ "file_path": path.display().to_string(), "diff": d.patch }),
        )
        .await?;

        if let Some(resp) = check_unchanged(&self.services, &path, Some(&content), "patching")? {
            return Ok(resp);
        }
        std::fs::write(&path, &updated)?;
        info!(path = %path.display(), additions = d.additions, removals = d.removals, "patch applied");

        record_history(&self.services, ctx.session_id, &path, Some(&content), &updated);
        record_access(&self.services, &path);

        let diagnostics = diagnostics_for(&self.services, ctx, &path).await;
        let message = format!("Patch applied to file: {}", path.display());
        Ok(ToolResponse::text(result_block(&message, &diagnostics))
            .with_metadata(ChangeMetadata::from(d)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_single_file_patch() {
        let patch = "--- a/f\n+++ b/f\n@@ -1,2 +1,2 @@\n a\n-b\n+B\n";
        assert_eq!(patched_content(patch, "a\nb\n").unwrap(), "a\nB\n");
    }

    #[test]
    fn reports_parse_and_apply_failures() {
        let bad_header = "--- a/f\n+++ b/f\n@@ nonsense @@\n a\n";
        assert!(patched_content(bad_header, "a\n")
            .unwrap_err()
            .starts_with("failed to parse patch"));

        let mismatch = "--- a/f\n+++ b/f\n@@ -1,1 +1,1 @@\n-zzz\n+y\n";
        assert!(patched_content(mismatch, "a\n")
            .unwrap_err()
            .starts_with("failed to apply patch"));
    }

    #[test]
    fn empty_patch_changes_nothing() {
        assert_eq!(patched_content("--- a/f\n+++ b/f\n", "x\n").unwrap(), "x\n");
    }
}
