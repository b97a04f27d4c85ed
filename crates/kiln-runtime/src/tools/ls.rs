use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use kiln_core::{KilnError, Result, Tool, ToolCall, ToolContext, ToolInfo, ToolResponse};

use super::{build_glob, decode_params, is_ignored_name, tool_info};
use crate::services::ToolServices;

pub const NAME: &str = "ls";
pub const MAX_FILES: usize = 1000;

const TRUNCATED_PREAMBLE: &str = "There are more than 1000 files in the directory. Use the ls tool \
(passing a specific path), the bash tool, and other tools to explore nested directories. The \
first 1000 files and directories are included below:\n\n";

const DESCRIPTION: &str = "Lists files and directories as a tree. Hidden entries and common build, \
cache and dependency directories are skipped. ignore takes glob patterns for more entries to \
skip; max_depth limits how deep the listing goes (1 lists only immediate children). At most 1000 \
entries are shown. Prefer glob and grep when you know what you are looking for.";

#[derive(Debug, Deserialize)]
struct LsParams {
    #[serde(default)]
    path: String,
    #[serde(default)]
    ignore: Vec<String>,
    #[serde(default)]
    max_depth: usize,
}

#[derive(Debug, Serialize)]
struct LsMetadata {
    number_of_files: usize,
    truncated: bool,
}

/// One listed entry: its depth below the root, name and kind.
#[derive(Debug, PartialEq, Eq)]
struct Entry {
    depth: usize,
    name: String,
    is_dir: bool,
}

fn skipped(entry: &DirEntry, root: &Path, ignores: &[globset::GlobMatcher]) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    if is_ignored_name(&name) {
        return true;
    }
    let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
    ignores
        .iter()
        .any(|g| g.is_match(name.as_ref()) || g.is_match(rel))
}

/// Walk `root` depth-first in name order. Returns up to [`MAX_FILES`]
/// entries and whether more were found.
fn list(root: &Path, ignores: &[globset::GlobMatcher], max_depth: usize) -> (Vec<Entry>, bool) {
    let mut walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .follow_links(false);
    if max_depth > 0 {
        walker = walker.max_depth(max_depth);
    }

    let mut entries = Vec::new();
    let iter = walker
        .into_iter()
        .filter_entry(|e| !skipped(e, root, ignores))
        .filter_map(|e| e.ok());
    for entry in iter {
        if entries.len() >= MAX_FILES {
            return (entries, true);
        }
        entries.push(Entry {
            depth: entry.depth(),
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir: entry.file_type().is_dir(),
        });
    }
    (entries, false)
}

fn render_tree(root: &Path, entries: &[Entry]) -> String {
    let root = root.display().to_string();
    let mut out = format!("- {}/\n", root.trim_end_matches('/'));
    for entry in entries {
        out.push_str(&"  ".repeat(entry.depth));
        out.push_str("- ");
        out.push_str(&entry.name);
        if entry.is_dir {
            out.push('/');
        }
        out.push('\n');
    }
    out
}

pub struct LsTool {
    services: Arc<ToolServices>,
}

impl LsTool {
    pub fn new(services: Arc<ToolServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Tool for LsTool {
    fn info(&self) -> ToolInfo {
        tool_info(
            NAME,
            DESCRIPTION,
            json!({
                "path": {
                    "type": "string",
                    "description": "The directory to list (defaults to the working directory)"
                },
                "ignore": {
                    "type": "array",
                    "description": "Glob patterns of entries to skip",
                    "items": { "type": "string" }
                },
                "max_depth": {
                    "type": "integer",
                    "description": "How many levels to descend (0 for no limit)"
                }
            }),
            &["path"],
        )
    }

    async fn run(&self, _ctx: &ToolContext, call: &ToolCall) -> Result<ToolResponse> {
        let params: LsParams = match decode_params(call) {
            Ok(p) => p,
            Err(resp) => return Ok(resp),
        };
        let root = if params.path.is_empty() {
            self.services.working_dir.clone()
        } else {
            self.services.resolve_path(&params.path)
        };

        match std::fs::metadata(&root) {
            Ok(meta) if !meta.is_dir() => {
                return Ok(ToolResponse::error(format!(
                    "path is not a directory: {}",
                    root.display()
                )));
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ToolResponse::error(format!(
                    "path does not exist: {}",
                    root.display()
                )));
            }
            Err(e) => return Err(e.into()),
        }

        let mut ignores = Vec::with_capacity(params.ignore.len());
        for pattern in &params.ignore {
            match build_glob(pattern) {
                Ok(g) => ignores.push(g),
                Err(message) => return Ok(ToolResponse::error(message)),
            }
        }

        let walk_root = root.clone();
        let max_depth = params.max_depth;
        let (entries, truncated) =
            tokio::task::spawn_blocking(move || list(&walk_root, &ignores, max_depth))
                .await
                .map_err(|e| KilnError::ToolExecution {
                    tool: NAME.to_string(),
                    reason: format!("directory walk failed: {e}"),
                })?;
        debug!(path = %root.display(), entries = entries.len(), truncated, "directory listed");

        let mut output = render_tree(&root, &entries);
        if truncated {
            output.insert_str(0, TRUNCATED_PREAMBLE);
        }
        Ok(ToolResponse::text(output).with_metadata(LsMetadata {
            number_of_files: entries.len(),
            truncated,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tree_fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("dir1/subdir")).unwrap();
        std::fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        std::fs::create_dir_all(root.join(".hidden_dir")).unwrap();
        std::fs::write(root.join("dir1/file1.txt"), "").unwrap();
        std::fs::write(root.join("dir1/subdir/file2.txt"), "").unwrap();
        std::fs::write(root.join("file3.txt"), "").unwrap();
        std::fs::write(root.join(".hidden_file"), "").unwrap();
        dir
    }

    #[test]
    fn renders_nested_tree() {
        let dir = tree_fixture();
        let (entries, truncated) = list(dir.path(), &[], 0);
        assert!(!truncated);
        let out = render_tree(Path::new("/root"), &entries);
        assert_eq!(
            out,
            "- /root/\n  - dir1/\n    - file1.txt\n    - subdir/\n      - file2.txt\n  - file3.txt\n"
        );
    }

    #[test]
    fn max_depth_and_user_ignores() {
        let dir = tree_fixture();
        let (entries, _) = list(dir.path(), &[], 1);
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["dir1", "file3.txt"]);

        let ignore = vec![build_glob("*.txt").unwrap()];
        let (entries, _) = list(dir.path(), &ignore, 0);
        assert!(entries.iter().all(|e| !e.name.ends_with(".txt")));
    }

    #[test]
    fn truncates_past_limit() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..MAX_FILES + 5 {
            std::fs::write(dir.path().join(format!("f{i:04}")), "").unwrap();
        }
        let (entries, truncated) = list(dir.path(), &[], 0);
        assert!(truncated);
        assert_eq!(entries.len(), MAX_FILES);
    }
}
