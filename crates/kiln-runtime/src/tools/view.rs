use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use kiln_core::{Result, Tool, ToolCall, ToolContext, ToolInfo, ToolResponse};

use super::{decode_params, tool_info};
use crate::services::ToolServices;

pub const NAME: &str = "view";
pub const MAX_READ_SIZE: u64 = 250 * 1024;
pub const DEFAULT_READ_LIMIT: usize = 2000;
pub const MAX_LINE_LENGTH: usize = 2000;

const MAX_SUGGESTIONS: usize = 3;
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "svg", "webp"];

const DESCRIPTION: &str = "Reads a file from the local filesystem and returns it with line numbers. \
By default it reads up to 2000 lines from the start of the file; offset (0-based) and limit select \
a window of a long file. Lines longer than 2000 characters are truncated. Files larger than 250KB \
and image files cannot be viewed. Use ls to explore directories.";

#[derive(Debug, Deserialize)]
struct ViewParams {
    #[serde(default)]
    file_path: String,
    #[serde(default)]
    offset: usize,
    #[serde(default)]
    limit: usize,
}

#[derive(Debug, Serialize)]
struct ViewMetadata {
    file_path: String,
    content: String,
}

fn image_kind(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    IMAGE_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// Up to three siblings whose names contain, or are contained in, the
/// missing file's name.
fn suggestions(path: &Path) -> Vec<String> {
    let (Some(dir), Some(base)) = (path.parent(), path.file_name().and_then(|b| b.to_str())) else {
        return Vec::new();
    };
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let base = base.to_lowercase();
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_lowercase();
            (name.contains(&base) || base.contains(&name))
                .then(|| dir.join(e.file_name()).display().to_string())
        })
        .take(MAX_SUGGESTIONS)
        .collect()
}

/// Lines `offset..offset+limit`, each capped at [`MAX_LINE_LENGTH`]
/// characters, plus the total line count.
fn read_window(text: &str, offset: usize, limit: usize) -> (Vec<String>, usize) {
    let mut total = 0;
    let mut window = Vec::new();
    for (i, line) in text.lines().enumerate() {
        total = i + 1;
        if i < offset || window.len() >= limit {
            continue;
        }
        let line = line.trim_end_matches('\r');
        if line.chars().count() > MAX_LINE_LENGTH {
            let cut: String = line.chars().take(MAX_LINE_LENGTH).collect();
            window.push(format!("{cut}..."));
        } else {
            window.push(line.to_string());
        }
    }
    (window, total)
}

fn number_lines(lines: &[String], first: usize) -> String {
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{:6}|{line}", first + i))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct ViewTool {
    services: Arc<ToolServices>,
}

impl ViewTool {
    pub fn new(services: Arc<ToolServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Tool for ViewTool {
    fn info(&self) -> ToolInfo {
        tool_info(
            NAME,
            DESCRIPTION,
            json!({
                "file_path": {
                    "type": "string",
                    "description": "The path to the file to read"
                },
                "offset": {
                    "type": "integer",
                    "description": "The line number to start reading from (0-based)"
                },
                "limit": {
                    "type": "integer",
                    "description": "The number of lines to read (defaults to 2000)"
                }
            }),
            &["file_path"],
        )
    }

    async fn run(&self, ctx: &ToolContext, call: &ToolCall) -> Result<ToolResponse> {
        let params: ViewParams = match decode_params(call) {
            Ok(p) => p,
            Err(resp) => return Ok(resp),
        };
        if params.file_path.is_empty() {
            return Ok(ToolResponse::error("file_path is required"));
        }
        let path = self.services.resolve_path(&params.file_path);

        let meta = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let similar = suggestions(&path);
                if similar.is_empty() {
                    return Ok(ToolResponse::error(format!("file not found: {}", path.display())));
                }
                return Ok(ToolResponse::error(format!(
                    "file not found: {}\n\nDid you mean one of these?\n{}",
                    path.display(),
                    similar.join("\n")
                )));
            }
            Err(e) => return Ok(ToolResponse::error(format!("failed to access file: {e}"))),
        };
        if meta.is_dir() {
            return Ok(ToolResponse::error(format!(
                "path is a directory, not a file: {}",
                path.display()
            )));
        }
        if meta.len() > MAX_READ_SIZE {
            return Ok(ToolResponse::error(format!(
                "file is too large ({} bytes). Maximum size is {} bytes",
                meta.len(),
                MAX_READ_SIZE
            )));
        }
        if let Some(kind) = image_kind(&path) {
            return Ok(ToolResponse::error(format!(
                "this is an image file of type: {kind}. Use a different tool to process images"
            )));
        }

        let bytes = std::fs::read(&path)?;
        let text = String::from_utf8_lossy(&bytes);
        let limit = if params.limit == 0 {
            DEFAULT_READ_LIMIT
        } else {
            params.limit
        };
        let (window, total) = read_window(&text, params.offset, limit);

        let mut output = String::from("<file>\n");
        output.push_str(&number_lines(&window, params.offset + 1));
        let last_shown = params.offset + window.len();
        if last_shown < total {
            output.push_str(&format!(
                "\n\n(File has more lines. Use 'offset' parameter to read beyond line {last_shown})"
            ));
        }
        output.push_str("\n</file>\n");

        self.services.ledger.record_read(&path);
        debug!(path = %path.display(), lines = window.len(), "file viewed");

        if self.services.diagnostics.has_clients() {
            self.services.diagnostics.open_file(&path).await;
            if !ctx.cancel.is_cancelled() {
                output.push_str(&self.services.diagnostics.render(Some(&path)));
            }
        }

        Ok(ToolResponse::text(output).with_metadata(ViewMetadata {
            file_path: path.display().to_string(),
            content: window.join("\n"),
        }))
    }
}
