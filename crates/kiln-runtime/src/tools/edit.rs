use std::path::{Path, PathBuf};
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

pub const NAME: &str = "edit";

const DESCRIPTION: &str = "Edits a file by replacing one exact occurrence of old_string with \
new_string. old_string must match the file exactly, including whitespace, and must occur exactly \
once; include surrounding lines to make it unique. An empty old_string creates a new file with \
new_string as its content. An empty new_string deletes old_string. The file must be viewed \
before it is edited.";

#[derive(Debug, Deserialize)]
struct EditParams {
    #[serde(default)]
    file_path: String,
    #[serde(default)]
    old_string: String,
    #[serde(default)]
    new_string: String,
}

/// What an edit call does, decided from which strings are empty.
enum EditOp<'a> {
    Create { content: &'a str },
    Delete { old: &'a str },
    Replace { old: &'a str, new: &'a str },
}

impl<'a> EditOp<'a> {
    fn from_params(p: &'a EditParams) -> Self {
        if p.old_string.is_empty() {
            EditOp::Create {
                content: &p.new_string,
            }
        } else if p.new_string.is_empty() {
            EditOp::Delete { old: &p.old_string }
        } else {
            EditOp::Replace {
                old: &p.old_string,
                new: &p.new_string,
            }
        }
    }
}

/// Replace the single occurrence of `old` in `content`, or explain why
/// that is not possible.
fn replace_unique(content: &str, old: &str, new: &str) -> std::result::Result<String, ToolResponse> {
    let Some(index) = content.find(old) else {
        return Err(ToolResponse::error(
            "old_string not found in file. Make sure it matches exactly, including whitespace and line breaks",
        ));
    };
    if content.rfind(old) != Some(index) {
        return Err(ToolResponse::error(
            "old_string appears multiple times in the file. Please provide more context to ensure a unique match",
        ));
    }
    let mut out = String::with_capacity(content.len() + new.len());
    out.push_str(&content[..index]);
    out.push_str(new);
    out.push_str(&content[index + old.len()..]);
    Ok(out)
}

pub struct EditTool {
    services: Arc<ToolServices>,
}

impl EditTool {
    pub fn new(services: Arc<ToolServices>) -> Self {
        Self { services }
    }

    async fn create(&self, ctx: &ToolContext, path: PathBuf, content: &str) -> Result<ToolResponse> {
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => {
                return Ok(ToolResponse::error(format!(
                    "path is a directory, not a file: {}",
                    path.display()
                )));
            }
            Ok(_) => {
                return Ok(ToolResponse::error(format!(
                    "file already exists: {}. Use the write tool to overwrite an existing file",
                    path.display()
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let d = diff::generate("", content, &path.display().to_string());
        require_permission(
            &self.services,
            ctx,
            NAME,
            "create",
            file_scope(&self.services, &path),
            format!("Create file {}", path.display()),
            json!({ "file_path": path.display().to_string(), "diff": d.patch }),
        )
        .await?;

        if let Some(resp) = check_unchanged(&self.services, &path, None, "editing")? {
            return Ok(resp);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        info!(path = %path.display(), "file created");

        self.finish(ctx, &path, None, content, "File created", d).await
    }

    /// Delete or replace inside an existing file.
    async fn modify(
        &self,
        ctx: &ToolContext,
        path: PathBuf,
        old: &str,
        new: &str,
    ) -> Result<ToolResponse> {
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
        if let Some(resp) = check_fresh_read(&self.services, &path, meta.modified()?, "editing") {
            return Ok(resp);
        }

        let content = std::fs::read_to_string(&path)?;
        let updated = match replace_unique(&content, old, new) {
            Ok(u) => u,
            Err(resp) => return Ok(resp),
        };
        if updated == content {
            return Ok(ToolResponse::error(
                "new content is the same as old content. No changes made.",
            ));
        }

        let deleting = new.is_empty();
        let (action, description, done) = if deleting {
            ("write", "Delete content from file", "Content deleted from file")
        } else {
            ("replace", "Replace content in file", "Content replaced in file")
        };

        let d = diff::generate(&content, &updated, &path.display().to_string());
        require_permission(
            &self.services,
            ctx,
            NAME,
            action,
            file_scope(&self.services, &path),
            format!("{description} {}", path.display()),
            json!({ "file_path": path.display().to_string(), "diff": d.patch }),
        )
        .await?;

        if let Some(resp) = check_unchanged(&self.services, &path, Some(&content), "editing")? {
            return Ok(resp);
        }
        std::fs::write(&path, &updated)?;
        info!(path = %path.display(), deleting, "file edited");

        self.finish(ctx, &path, Some(&content), &updated, done, d).await
    }

    async fn finish(
        &self,
        ctx: &ToolContext,
        path: &Path,
        old: Option<&str>,
        new: &str,
        done: &str,
        d: diff::GeneratedDiff,
    ) -> Result<ToolResponse> {
        record_history(&self.services, ctx.session_id, path, old, new);
        record_access(&self.services, path);
        let diagnostics = diagnostics_for(&self.services, ctx, path).await;
        let message = format!("{done}: {}", path.display());
        Ok(ToolResponse::text(result_block(&message, &diagnostics))
            .with_metadata(ChangeMetadata::from(d)))
    }
}

#[async_trait]
impl Tool for EditTool {
    fn info(&self) -> ToolInfo {
        tool_info(
            NAME,
            DESCRIPTION,
            json!({
                "file_path": {
                    "type": "string",
                    "description": "The path to the file to modify"
                },
                "old_string": {
                    "type": "string",
                    "description": "The text to replace"
                },
                "new_string": {
                    "type": "string",
                    "description": "The text to replace it with"
                }
            }),
            &["file_path", "old_string", "new_string"],
        )
    }

    async fn run(&self, ctx: &ToolContext, call: &ToolCall) -> Result<ToolResponse> {
        let params: EditParams = match decode_params(call) {
            Ok(p) => p,
            Err(resp) => return Ok(resp),
        };
        if params.file_path.is_empty() {
            return Ok(ToolResponse::error("file_path is required"));
        }
        let path = self.services.resolve_path(&params.file_path);

        match EditOp::from_params(&params) {
            EditOp::Create { content } => self.create(ctx, path, content).await,
            EditOp::Delete { old } => self.modify(ctx, path, old, "").await,
            EditOp::Replace { old, new } => self.modify(ctx, path, old, new).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_single_occurrence() {
        assert_eq!(replace_unique("a b c", "b", "B").unwrap(), "a B c");
        assert_eq!(replace_unique("a b c", "b ", "").unwrap(), "a c");
    }

    #[test]
    fn rejects_missing_and_repeated() {
        let missing = replace_unique("abc", "x", "y").unwrap_err();
        assert!(missing.content.starts_with("old_string not found"));
        let repeated = replace_unique("aa\nbb\naa\n", "aa", "zz").unwrap_err();
        assert!(repeated.content.contains("appears multiple times"));
    }
}
