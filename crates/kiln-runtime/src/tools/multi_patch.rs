use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use kiln_core::{KilnError, Result, Tool, ToolCall, ToolContext, ToolInfo, ToolResponse};

use super::write::ChangeMetadata;
use super::{
    check_fresh_read, check_unchanged, decode_params, diagnostics_for, file_scope, record_access,
    record_history, require_permission, tool_info,
};
use crate::diff::{self, FileChange};
use crate::services::ToolServices;

pub const NAME: &str = "multi_patch";

/// Highest fuzz score a patch may carry and still be applied.
pub const MAX_FUZZ: usize = 3;

const DESCRIPTION: &str = "Applies a patch that adds, updates, deletes or moves several files at \
once. The patch starts with '*** Begin Patch' and ends with '*** End Patch'. Each file section \
starts with '*** Add File: <path>', '*** Update File: <path>' or '*** Delete File: <path>'; an \
update may be followed by '*** Move to: <path>'. In updates, '@@ <line>' names a unique line \
before the change, and body lines start with ' ' (keep), '-' (remove) or '+' (add). Added files \
list every line prefixed with '+'. Files being updated or deleted must be viewed first. Context \
lines must match the file closely; imprecise context is rejected.";

#[derive(Debug, Deserialize)]
struct MultiPatchParams {
    #[serde(default)]
    patch_text: String,
}

pub struct MultiPatchTool {
    services: Arc<ToolServices>,
}

impl MultiPatchTool {
    pub fn new(services: Arc<ToolServices>) -> Self {
        Self { services }
    }

    /// Load every file the patch updates or deletes, enforcing the
    /// read-before-modify checks, and refuse targets that already exist.
    /// Keys are the paths as written in the patch.
    fn load_needed(
        &self,
        text: &str,
    ) -> Result<std::result::Result<BTreeMap<String, String>, ToolResponse>> {
        let mut current = BTreeMap::new();
        for raw in diff::identify_files_needed(text) {
            let path = self.services.resolve_path(&raw);
            let meta = match std::fs::metadata(&path) {
                Ok(m) => m,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Ok(Err(ToolResponse::error(format!(
                        "file not found: {}",
                        path.display()
                    ))));
                }
                Err(e) => return Err(e.into()),
            };
            if meta.is_dir() {
                return Ok(Err(ToolResponse::error(format!(
                    "path is a directory, not a file: {}",
                    path.display()
                ))));
            }
            if let Some(resp) = check_fresh_read(&self.services, &path, meta.modified()?, "patching") {
                return Ok(Err(resp));
            }
            current.insert(raw, std::fs::read_to_string(&path)?);
        }
        if let Some(resp) = self.check_targets_absent(text) {
            return Ok(Err(resp));
        }
        Ok(Ok(current))
    }

    /// Added files and move destinations must not exist.
    fn check_targets_absent(&self, text: &str) -> Option<ToolResponse> {
        for raw in diff::identify_files_added(text) {
            let path = self.services.resolve_path(&raw);
            if path.exists() {
                return Some(ToolResponse::error(format!(
                    "file already exists and cannot be added: {}",
                    path.display()
                )));
            }
        }
        for raw in diff::identify_move_targets(text) {
            let path = self.services.resolve_path(&raw);
            if path.exists() {
                return Some(ToolResponse::error(format!(
                    "file already exists and cannot be the target of a move: {}",
                    path.display()
                )));
            }
        }
        None
    }

    /// Once every change is approved, confirm nothing the patch was
    /// computed from has changed on disk.
    fn check_unchanged_since_load(
        &self,
        text: &str,
        current: &BTreeMap<String, String>,
    ) -> Result<Option<ToolResponse>> {
        for (raw, content) in current {
            let path = self.services.resolve_path(raw);
            let expected = Some(content.as_str());
            if let Some(resp) = check_unchanged(&self.services, &path, expected, "patching")? {
                return Ok(Some(resp));
            }
        }
        Ok(self.check_targets_absent(text))
    }
}

fn permission_for(change: &FileChange) -> (&'static str, &'static str) {
    match change {
        FileChange::Add { .. } => ("create", "Create file"),
        FileChange::Update {
            move_path: Some(_), ..
        } => ("patch", "Move and patch file"),
        FileChange::Update { .. } => ("patch", "Patch file"),
        FileChange::Delete { .. } => ("delete", "Delete file"),
    }
}

/// Where the new content of a change ends up.
fn destination<'a>(path: &'a str, change: &'a FileChange) -> &'a str {
    match change {
        FileChange::Update {
            move_path: Some(dest),
            ..
        } => dest,
        _ => path,
    }
}

#[async_trait]
impl Tool for MultiPatchTool {
    fn info(&self) -> ToolInfo {
        tool_info(
            NAME,
            DESCRIPTION,
            json!({
                "patch_text": {
                    "type": "string",
                    "description": "The full patch text, from '*** Begin Patch' to '*** End Patch'"
                }
            }),
            &["patch_text"],
        )
    }

    async fn run(&self, ctx: &ToolContext, call: &ToolCall) -> Result<ToolResponse> {
        let params: MultiPatchParams = match decode_params(call) {
            Ok(p) => p,
            Err(resp) => return Ok(resp),
        };
        if params.patch_text.is_empty() {
            return Ok(ToolResponse::error("patch_text is required"));
        }

        let current = match self.load_needed(&params.patch_text)? {
            Ok(c) => c,
            Err(resp) => return Ok(resp),
        };
        let (patch, fuzz) = match diff::text_to_patch(&params.patch_text, &current) {
            Ok(p) => p,
            Err(e) => return Ok(ToolResponse::error(format!("failed to parse patch: {e}"))),
        };
        if fuzz > MAX_FUZZ {
            return Ok(ToolResponse::error(format!(
                "patch contains fuzzy matches (fuzz level: {fuzz}). Please make your context lines more precise"
            )));
        }
        let commit = match diff::patch_to_commit(&patch, &current) {
            Ok(c) => c,
            Err(e) => {
                return Ok(ToolResponse::error(format!(
                    "failed to create commit from patch: {e}"
                )));
            }
        };

        // Every change is approved before anything touches the disk.
        let mut diffs = Vec::with_capacity(commit.changes.len());
        for (raw, change) in &commit.changes {
            let path = self.services.resolve_path(raw);
            let d = diff::generate(
                change.old_content(),
                change.new_content(),
                &path.display().to_string(),
            );
            let (action, verb) = permission_for(change);
            require_permission(
                &self.services,
                ctx,
                NAME,
                action,
                file_scope(&self.services, &path),
                format!("{verb} {}", path.display()),
                json!({ "file_path": path.display().to_string(), "diff": d.patch }),
            )
            .await?;
            diffs.push(d);
        }
        if let Some(resp) = self.check_unchanged_since_load(&params.patch_text, &current)? {
            return Ok(resp);
        }

        let done: RefCell<Vec<String>> = RefCell::new(Vec::new());
        let outcome = diff::apply_commit(
            &commit,
            |raw, content| {
                let path = self.services.resolve_path(raw);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&path, content)?;
                done.borrow_mut().push(raw.to_string());
                Ok::<(), std::io::Error>(())
            },
            |raw| {
                std::fs::remove_file(self.services.resolve_path(raw))?;
                done.borrow_mut().push(raw.to_string());
                Ok(())
            },
        );
        if let Err(e) = outcome {
            let done = done.into_inner();
            warn!(completed = done.len(), error = %e, "multi-file patch stopped part way");
            return Err(KilnError::PatchPartial(format!(
                "{e} (completed: {})",
                if done.is_empty() {
                    "none".to_string()
                } else {
                    done.join(", ")
                }
            )));
        }

        let mut touched: Vec<PathBuf> = Vec::new();
        for (raw, change) in &commit.changes {
            let source = self.services.resolve_path(raw);
            let target = self.services.resolve_path(destination(raw, change));
            match change {
                FileChange::Add { new } => {
                    record_history(&self.services, ctx.session_id, &target, None, new);
                    record_access(&self.services, &target);
                    touched.push(target);
                }
                FileChange::Update { old, new, .. } => {
                    record_history(&self.services, ctx.session_id, &target, Some(old), new);
                    record_access(&self.services, &target);
                    if source != target {
                        self.services.ledger.record_write(&source);
                    }
                    touched.push(target);
                }
                FileChange::Delete { old } => {
                    record_history(&self.services, ctx.session_id, &source, Some(old), "");
                    self.services.ledger.record_write(&source);
                }
            }
        }

        let additions: usize = diffs.iter().map(|d| d.additions).sum();
        let removals: usize = diffs.iter().map(|d| d.removals).sum();
        info!(
            files = commit.changes.len(),
            additions, removals, fuzz, "multi-file patch applied"
        );

        let mut text = format!(
            "Patch applied successfully. {} files changed, {additions} additions, {removals} removals",
            commit.changes.len()
        );
        for path in &touched {
            text.push_str(&diagnostics_for(&self.services, ctx, path).await);
        }

        let combined = ChangeMetadata {
            diff: diffs
                .into_iter()
                .map(|d| d.patch)
                .collect::<Vec<_>>()
                .join("\n"),
            additions,
            removals,
        };
        Ok(ToolResponse::text(text).with_metadata(combined))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_wording() {
        let add = FileChange::Add { new: "x".into() };
        let del = FileChange::Delete { old: "x".into() };
        let mv = FileChange::Update {
            old: "a".into(),
            new: "b".into(),
            move_path: Some("/w/new.rs".into()),
        };
        assert_eq!(permission_for(&add), ("create", "Create file"));
        assert_eq!(permission_for(&del), ("delete", "Delete file"));
        assert_eq!(permission_for(&mv).1, "Move and patch file");
        assert_eq!(destination("/w/old.rs", &mv), "/w/new.rs");
        assert_eq!(destination("/w/gone.rs", &del), "/w/gone.rs");
    }
}
