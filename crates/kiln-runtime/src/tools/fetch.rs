use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use kiln_core::{KilnError, Result, Tool, ToolCall, ToolContext, ToolInfo, ToolResponse};

use super::{require_permission, tool_info};
use crate::html::{html_to_markdown, html_to_text};
use crate::services::ToolServices;

pub const NAME: &str = "fetch";
pub const MAX_RESPONSE_BYTES: usize = 5 * 1024 * 1024;
pub const MAX_TIMEOUT_SECS: u64 = 120;

const DESCRIPTION: &str = "Fetches a URL over HTTP(S) and returns its body as text, markdown or \
raw html. HTML pages are converted for the text and markdown formats. Responses are limited to \
5MB and the timeout, in seconds, is capped at 120.";

#[derive(Debug, Deserialize)]
struct FetchParams {
    #[serde(default)]
    url: String,
    #[serde(default)]
    format: String,
    #[serde(default)]
    timeout: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Text,
    Markdown,
    Html,
}

impl Format {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "text" => Some(Format::Text),
            "markdown" => Some(Format::Markdown),
            "html" => Some(Format::Html),
            _ => None,
        }
    }

    fn render(self, body: String, is_html: bool) -> String {
        match (self, is_html) {
            (Format::Text, true) => html_to_text(&body),
            (Format::Markdown, true) => html_to_markdown(&body),
            (Format::Markdown, false) => format!("```\n{body}\n```"),
            (Format::Text, false) | (Format::Html, _) => body,
        }
    }
}

/// Read at most [`MAX_RESPONSE_BYTES`] of the body; the rest is dropped.
async fn read_limited(mut response: reqwest::Response) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| KilnError::Http(format!("failed to read response body: {e}")))?
    {
        let room = MAX_RESPONSE_BYTES - body.len();
        if chunk.len() >= room {
            body.extend_from_slice(&chunk[..room]);
            break;
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

pub struct FetchTool {
    services: Arc<ToolServices>,
}

impl FetchTool {
    pub fn new(services: Arc<ToolServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Tool for FetchTool {
    fn info(&self) -> ToolInfo {
        tool_info(
            NAME,
            DESCRIPTION,
            json!({
                "url": {
                    "type": "string",
                    "description": "The URL to fetch content from"
                },
                "format": {
                    "type": "string",
                    "description": "The format to return the content in (text, markdown, or html)",
                    "enum": ["text", "markdown", "html"]
                },
                "timeout": {
                    "type": "number",
                    "description": "Optional timeout in seconds (max 120)"
                }
            }),
            &["url", "format"],
        )
    }

    async fn run(&self, ctx: &ToolContext, call: &ToolCall) -> Result<ToolResponse> {
        let params: FetchParams = match call.decode() {
            Ok(p) => p,
            Err(e) => {
                return Ok(ToolResponse::error(format!(
                    "Failed to parse fetch parameters: {e}"
                )));
            }
        };
        if params.url.is_empty() {
            return Ok(ToolResponse::error("URL parameter is required"));
        }
        let Some(format) = Format::parse(&params.format) else {
            return Ok(ToolResponse::error("Format must be one of: text, markdown, html"));
        };
        if !params.url.starts_with("http://") && !params.url.starts_with("https://") {
            return Ok(ToolResponse::error("URL must start with http:// or https://"));
        }
        if let Err(e) = url::Url::parse(&params.url) {
            return Ok(ToolResponse::error(format!("invalid URL: {e}")));
        }

        require_permission(
            &self.services,
            ctx,
            NAME,
            "fetch",
            self.services.working_dir.display().to_string(),
            format!("Fetch content from URL: {}", params.url),
            json!({ "url": params.url, "format": params.format, "timeout": params.timeout }),
        )
        .await?;

        let mut request = self.services.http.get(&params.url);
        if params.timeout > 0 {
            request = request.timeout(Duration::from_secs(params.timeout.min(MAX_TIMEOUT_SECS)));
        }
        info!(url = %params.url, ?format, "fetching url");

        let fetched = async {
            let response = request
                .send()
                .await
                .map_err(|e| KilnError::Http(format!("failed to fetch URL: {e}")))?;
            let status = response.status();
            if status != reqwest::StatusCode::OK {
                return Ok(Err(status.as_u16()));
            }
            let is_html = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|ct| ct.contains("text/html"));
            let body = read_limited(response).await?;
            Ok::<_, KilnError>(Ok((body, is_html)))
        };
        let outcome = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(KilnError::Cancelled),
            res = fetched => res?,
        };

        let (body, is_html) = match outcome {
            Ok(ok) => ok,
            Err(code) => {
                return Ok(ToolResponse::error(format!(
                    "Request failed with status code: {code}"
                )));
            }
        };
        debug!(url = %params.url, bytes = body.len(), is_html, "fetched");
        let body = String::from_utf8_lossy(&body).into_owned();
        Ok(ToolResponse::text(format.render(body, is_html)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parsing() {
        assert_eq!(Format::parse("Markdown"), Some(Format::Markdown));
        assert_eq!(Format::parse("pdf"), None);
    }

    #[test]
    fn non_html_is_fenced_in_markdown() {
        assert_eq!(
            Format::Markdown.render("{\"a\":1}".into(), false),
            "```\n{\"a\":1}\n```"
        );
        assert_eq!(Format::Html.render("<p>x</p>".into(), true), "<p>x</p>");
        assert_eq!(Format::Text.render("<p>x  y</p>".into(), true), "x y");
    }
}
