use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::process::Command;
use tracing::{debug, warn};
use walkdir::WalkDir;

use kiln_core::{KilnError, Result, Tool, ToolCall, ToolContext, ToolInfo, ToolResponse};

use super::glob::TRUNCATION_NOTE;
use super::{build_glob, decode_params, is_hidden, mtime, tool_info};
use crate::services::ToolServices;

pub const NAME: &str = "grep";
pub const MAX_RESULTS: usize = 100;

/// The fallback walker stops after this many matching files.
const WALK_LIMIT: usize = 200;

const DESCRIPTION: &str = "Searches file contents with a regular expression and lists matching \
lines grouped by file, most recently modified files first. include restricts the search to files \
matching a glob such as '*.rs' or '*.{ts,tsx}'. Set literal_text to search for the pattern \
exactly as written instead of as a regex. At most 100 matches are returned.";

#[derive(Debug, Deserialize)]
struct GrepParams {
    #[serde(default)]
    pattern: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    include: String,
    #[serde(default)]
    literal_text: bool,
}

#[derive(Debug, Serialize)]
struct GrepMetadata {
    number_of_matches: usize,
    truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct GrepMatch {
    path: PathBuf,
    modified: SystemTime,
    line_num: usize,
    line_text: String,
}

/// Newest file first; within a file, in line order.
fn sort_matches(matches: &mut [GrepMatch]) {
    matches.sort_by(|a, b| {
        b.modified
            .cmp(&a.modified)
            .then_with(|| a.path.cmp(&b.path))
            .then_with(|| a.line_num.cmp(&b.line_num))
    });
}

/// Parse `path:line:text` lines as printed by `rg -n --with-filename`.
fn parse_rg_output(stdout: &str) -> Vec<GrepMatch> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, ':');
            let path = PathBuf::from(parts.next()?);
            let line_num = parts.next()?.parse().ok()?;
            let line_text = parts.next()?.to_string();
            let modified = std::fs::metadata(&path).ok()?.modified().ok()?;
            Some(GrepMatch {
                path,
                modified,
                line_num,
                line_text,
            })
        })
        .collect()
}

/// Run ripgrep. `None` when it is not installed or fails to run.
async fn search_with_ripgrep(
    ctx: &ToolContext,
    pattern: &str,
    root: &Path,
    include: &str,
) -> Result<Option<Vec<GrepMatch>>> {
    let mut cmd = Command::new("rg");
    cmd.args(["-n", "--with-filename", "--no-heading", "--color", "never", "-e", pattern]);
    if !include.is_empty() {
        cmd.args(["--glob", include]);
    }
    cmd.arg(root).kill_on_drop(true);

    let output = tokio::select! {
        _ = ctx.cancel.cancelled() => return Err(KilnError::Cancelled),
        out = cmd.output() => out,
    };
    let output = match output {
        Ok(o) => o,
        Err(e) => {
            debug!(error = %e, "ripgrep unavailable, using the built-in walker");
            return Ok(None);
        }
    };
    match output.status.code() {
        Some(0) => Ok(Some(parse_rg_output(&String::from_utf8_lossy(&output.stdout)))),
        Some(1) => Ok(Some(Vec::new())),
        code => {
            warn!(?code, stderr = %String::from_utf8_lossy(&output.stderr), "ripgrep failed");
            Ok(None)
        }
    }
}

/// First line in `path` matching `re`.
fn first_match(path: &Path, re: &Regex) -> Option<(usize, String)> {
    let file = std::fs::File::open(path).ok()?;
    BufReader::new(file)
        .lines()
        .map_while(|l| l.ok())
        .enumerate()
        .find(|(_, line)| re.is_match(line))
        .map(|(i, line)| (i + 1, line))
}

/// Walk `root` and record the first matching line of each file.
fn search_with_walker(
    re: &Regex,
    root: &Path,
    include: Option<&globset::GlobMatcher>,
) -> Vec<GrepMatch> {
    let mut matches = Vec::new();
    let files = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(&e.file_name().to_string_lossy()))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file());
    for entry in files {
        if let Some(include) = include {
            let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
            if !include.is_match(entry.file_name()) && !include.is_match(rel) {
                continue;
            }
        }
        let Some((line_num, line_text)) = first_match(entry.path(), re) else {
            continue;
        };
        matches.push(GrepMatch {
            modified: mtime(entry.path()),
            path: entry.into_path(),
            line_num,
            line_text,
        });
        if matches.len() >= WALK_LIMIT {
            break;
        }
    }
    matches
}

fn render(matches: &[GrepMatch], truncated: bool) -> String {
    if matches.is_empty() {
        return "No files found".to_string();
    }
    let mut out = format!("Found {} matches\n", matches.len());
    let mut current: Option<&Path> = None;
    for m in matches {
        if current != Some(m.path.as_path()) {
            if current.is_some() {
                out.push('\n');
            }
            current = Some(&m.path);
            out.push_str(&format!("{}:\n", m.path.display()));
        }
        out.push_str(&format!("  Line {}: {}\n", m.line_num, m.line_text));
    }
    if truncated {
        out.push('\n');
        out.push_str(TRUNCATION_NOTE);
    }
    out
}

pub struct GrepTool {
    services: Arc<ToolServices>,
}

impl GrepTool {
    pub fn new(services: Arc<ToolServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Tool for GrepTool {
    fn info(&self) -> ToolInfo {
        tool_info(
            NAME,
            DESCRIPTION,
            json!({
                "pattern": {
                    "type": "string",
                    "description": "The regex pattern to search for in file contents"
                },
                "path": {
                    "type": "string",
                    "description": "The directory to search in (defaults to the working directory)"
                },
                "include": {
                    "type": "string",
                    "description": "File pattern to include in the search, e.g. \"*.js\" or \"*.{ts,tsx}\""
                },
                "literal_text": {
                    "type": "boolean",
                    "description": "Treat the pattern as literal text instead of a regex"
                }
            }),
            &["pattern"],
        )
    }

    async fn run(&self, ctx: &ToolContext, call: &ToolCall) -> Result<ToolResponse> {
        let params: GrepParams = match decode_params(call) {
            Ok(p) => p,
            Err(resp) => return Ok(resp),
        };
        if params.pattern.is_empty() {
            return Ok(ToolResponse::error("pattern is required"));
        }
        let pattern = if params.literal_text {
            regex::escape(&params.pattern)
        } else {
            params.pattern.clone()
        };
        let re = match Regex::new(&pattern) {
            Ok(re) => re,
            Err(e) => return Ok(ToolResponse::error(format!("invalid regex pattern: {e}"))),
        };
        let include = if params.include.is_empty() {
            None
        } else {
            match build_glob(&params.include) {
                Ok(g) => Some(g),
                Err(message) => return Ok(ToolResponse::error(message)),
            }
        };
        let root = if params.path.is_empty() {
            self.services.working_dir.clone()
        } else {
            self.services.resolve_path(&params.path)
        };

        let mut matches = match search_with_ripgrep(ctx, &pattern, &root, &params.include).await? {
            Some(found) => found,
            None => {
                let walk_root = root.clone();
                tokio::task::spawn_blocking(move || {
                    search_with_walker(&re, &walk_root, include.as_ref())
                })
                .await
                .map_err(|e| KilnError::ToolExecution {
                    tool: NAME.to_string(),
                    reason: format!("error searching files: {e}"),
                })?
            }
        };

        sort_matches(&mut matches);
        matches.dedup_by(|a, b| a.path == b.path && a.line_num == b.line_num);
        let truncated = matches.len() > MAX_RESULTS;
        matches.truncate(MAX_RESULTS);
        debug!(pattern = %pattern, root = %root.display(), found = matches.len(), truncated, "grep finished");

        Ok(ToolResponse::text(render(&matches, truncated)).with_metadata(GrepMetadata {
            number_of_matches: matches.len(),
            truncated,
        }))
    }
}
