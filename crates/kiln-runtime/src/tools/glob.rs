use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use walkdir::WalkDir;

use kiln_core::{KilnError, Result, Tool, ToolCall, ToolContext, ToolInfo, ToolResponse};

use super::{build_glob, decode_params, is_hidden, tool_info};
use crate::services::ToolServices;

pub const NAME: &str = "glob";
pub const MAX_RESULTS: usize = 100;

pub(crate) const TRUNCATION_NOTE: &str =
    "(Results are truncated. Consider using a more specific path or pattern.)";

const DESCRIPTION: &str = "Finds files by name pattern, newest first. Supports '*' (within one \
path segment), '**' (any number of segments), '?' and '{a,b}' alternatives, for example \
'**/*.rs' or 'src/**/*.{ts,tsx}'. The pattern is matched against paths relative to the search \
directory. Hidden files are skipped and at most 100 paths are returned.";

#[derive(Debug, Deserialize)]
struct GlobParams {
    #[serde(default)]
    pattern: String,
    #[serde(default)]
    path: String,
}

#[derive(Debug, Serialize)]
struct GlobMetadata {
    number_of_files: usize,
    truncated: bool,
}

/// Files under `root` whose relative path matches, newest first, capped
/// at `limit`. The flag reports whether more matched.
pub(crate) fn find_files(
    root: &Path,
    matcher: &globset::GlobMatcher,
    limit: usize,
) -> (Vec<PathBuf>, bool) {
    let mut found: Vec<(PathBuf, SystemTime)> = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(&e.file_name().to_string_lossy()))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .strip_prefix(root)
                .is_ok_and(|rel| matcher.is_match(rel))
        })
        .map(|e| {
            let modified = e
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (e.into_path(), modified)
        })
        .collect();

    found.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let truncated = found.len() > limit;
    found.truncate(limit);
    (found.into_iter().map(|(p, _)| p).collect(), truncated)
}

pub struct GlobTool {
    services: Arc<ToolServices>,
}

impl GlobTool {
    pub fn new(services: Arc<ToolServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Tool for GlobTool {
    fn info(&self) -> ToolInfo {
        tool_info(
            NAME,
            DESCRIPTION,
            json!({
                "pattern": {
                    "type": "string",
                    "description": "The glob pattern to match files against"
                },
                "path": {
                    "type": "string",
                    "description": "The directory to search in (defaults to the working directory)"
                }
            }),
            &["pattern"],
        )
    }

    async fn run(&self, _ctx: &ToolContext, call: &ToolCall) -> Result<ToolResponse> {
        let params: GlobParams = match decode_params(call) {
            Ok(p) => p,
            Err(resp) => return Ok(resp),
        };
        if params.pattern.is_empty() {
            return Ok(ToolResponse::error("pattern is required"));
        }
        let root = if params.path.is_empty() {
            self.services.working_dir.clone()
        } else {
            self.services.resolve_path(&params.path)
        };
        let matcher = match build_glob(&params.pattern) {
            Ok(m) => m,
            Err(message) => return Ok(ToolResponse::error(message)),
        };

        let walk_root = root.clone();
        let (files, truncated) =
            tokio::task::spawn_blocking(move || find_files(&walk_root, &matcher, MAX_RESULTS))
                .await
                .map_err(|e| KilnError::ToolExecution {
                    tool: NAME.to_string(),
                    reason: format!("glob search failed: {e}"),
                })?;
        debug!(pattern = %params.pattern, root = %root.display(), found = files.len(), truncated, "glob finished");

        let output = if files.is_empty() {
            "No files found".to_string()
        } else {
            let mut out = files
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join("\n");
            if truncated {
                out.push_str("\n\n");
                out.push_str(TRUNCATION_NOTE);
            }
            out
        };
        Ok(ToolResponse::text(output).with_metadata(GlobMetadata {
            number_of_files: files.len(),
            truncated,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;

    fn touch(path: &Path, age_secs: u64) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        let f = File::create(path).unwrap();
        f.set_modified(SystemTime::now() - Duration::from_secs(age_secs))
            .unwrap();
    }

    #[test]
    fn newest_first_and_hidden_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("old.rs"), 300);
        touch(&root.join("src/new.rs"), 10);
        touch(&root.join("src/mid.rs"), 100);
        touch(&root.join(".git/hook.rs"), 0);

        let matcher = build_glob("**/*.rs").unwrap();
        let (files, truncated) = find_files(root, &matcher, 10);
        assert!(!truncated);
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().display().to_string())
            .collect();
        assert_eq!(names, vec!["src/new.rs", "src/mid.rs", "old.rs"]);
    }

    #[test]
    fn truncation_flag_set_only_past_limit() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..3 {
            touch(&dir.path().join(format!("f{i}.txt")), i);
        }
        let matcher = build_glob("*.txt").unwrap();
        assert!(!find_files(dir.path(), &matcher, 3).1);
        let (files, truncated) = find_files(dir.path(), &matcher, 2);
        assert!(truncated);
        assert_eq!(files.len(), 2);
    }
}
