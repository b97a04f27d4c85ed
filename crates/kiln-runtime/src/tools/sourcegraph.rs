use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use kiln_core::{KilnError, Result, Tool, ToolCall, ToolContext, ToolInfo, ToolResponse};

use super::tool_info;
use crate::services::ToolServices;

pub const NAME: &str = "sourcegraph";

const DEFAULT_COUNT: usize = 10;
const MAX_COUNT: usize = 20;
const DEFAULT_CONTEXT_WINDOW: usize = 10;
const MAX_TIMEOUT_SECS: u64 = 120;
/// Results rendered per response, whatever `count` asked for.
const MAX_RENDERED: usize = 10;

const SEARCH_QUERY: &str = "query Search($query: String!) { search(query: $query, version: V2, \
patternType: keyword ) { results { matchCount, limitHit, resultCount, approximateResultCount, \
missing { name }, timedout { name }, indexUnavailable, results { __typename, ... on FileMatch { \
repository { name }, file { path, url, content }, lineMatches { preview, lineNumber, \
offsetAndLengths } } } } } }";

const DESCRIPTION: &str = "Searches public code indexed by Sourcegraph. The query uses Sourcegraph \
syntax, for example 'repo:^github\\.com/tokio-rs/tokio$ fn spawn', 'lang:rust file:\\.rs$ \
LazyLock' or 'type:symbol Deserialize'. count limits results (default 10, max 20); \
context_window sets how many lines surround each match (default 10).";

#[derive(Debug, Deserialize)]
struct SourcegraphParams {
    #[serde(default)]
    query: String,
    #[serde(default)]
    count: usize,
    #[serde(default)]
    context_window: usize,
    #[serde(default)]
    timeout: u64,
}

// ── GraphQL response ───────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct GraphqlResponse {
    #[serde(default)]
    errors: Vec<GraphqlError>,
    data: Option<SearchData>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    search: SearchBody,
}

#[derive(Debug, Deserialize)]
struct SearchBody {
    results: SearchResults,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SearchResults {
    match_count: u64,
    result_count: u64,
    limit_hit: bool,
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "__typename")]
enum SearchResult {
    #[serde(rename_all = "camelCase")]
    FileMatch {
        repository: Repository,
        file: FileInfo,
        #[serde(default)]
        line_matches: Vec<LineMatch>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Repository {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    #[serde(default)]
    path: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LineMatch {
    #[serde(default)]
    preview: String,
    #[serde(default)]
    line_number: usize,
}

/// Markdown summary of a GraphQL response.
fn format_results(
    response: &GraphqlResponse,
    context_window: usize,
) -> std::result::Result<String, String> {
    let mut out = String::new();
    if !response.errors.is_empty() {
        out.push_str("## Sourcegraph API Error\n\n");
        for e in &response.errors {
            let _ = writeln!(out, "- {}", e.message);
        }
        return Ok(out);
    }
    let results = &response
        .data
        .as_ref()
        .ok_or("invalid response format: missing data field")?
        .search
        .results;

    out.push_str("# Sourcegraph Search Results\n\n");
    let _ = writeln!(
        out,
        "Found {} matches across {} results",
        results.match_count, results.result_count
    );
    if results.limit_hit {
        out.push_str("(Result limit reached, try a more specific query)\n");
    }
    out.push('\n');

    if results.results.is_empty() {
        out.push_str("No results found. Try a different query.\n");
        return Ok(out);
    }

    for (i, result) in results.results.iter().take(MAX_RENDERED).enumerate() {
        let SearchResult::FileMatch {
            repository,
            file,
            line_matches,
        } = result
        else {
            continue;
        };
        let _ = write!(out, "## Result {}: {}/{}\n\n", i + 1, repository.name, file.path);
        if !file.url.is_empty() {
            let _ = write!(out, "URL: {}\n\n", file.url);
        }
        let lines: Vec<&str> = file.content.split('\n').collect();
        for m in line_matches {
            out.push_str("```\n");
            if file.content.is_empty() {
                let _ = writeln!(out, "{}| {}", m.line_number, m.preview);
            } else {
                let start = m.line_number.saturating_sub(context_window).max(1);
                for j in (start - 1)..m.line_number.saturating_sub(1).min(lines.len()) {
                    let _ = writeln!(out, "{}| {}", j + 1, lines[j]);
                }
                let _ = writeln!(out, "{}|  {}", m.line_number, m.preview);
                let end = (m.line_number + context_window).min(lines.len());
                for j in m.line_number..end {
                    let _ = writeln!(out, "{}| {}", j + 1, lines[j]);
                }
            }
            out.push_str("```\n\n");
        }
    }
    Ok(out)
}

pub struct SourcegraphTool {
    services: Arc<ToolServices>,
}

impl SourcegraphTool {
    pub fn new(services: Arc<ToolServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Tool for SourcegraphTool {
    fn info(&self) -> ToolInfo {
        tool_info(
            NAME,
            DESCRIPTION,
            json!({
                "query": {
                    "type": "string",
                    "description": "The Sourcegraph search query"
                },
                "count": {
                    "type": "number",
                    "description": "Optional number of results to return (default: 10, max: 20)"
                },
                "context_window": {
                    "type": "number",
                    "description": "The context around the match to return (default: 10 lines)"
                },
                "timeout": {
                    "type": "number",
                    "description": "Optional timeout in seconds (max 120)"
                }
            }),
            &["query"],
        )
    }

    async fn run(&self, ctx: &ToolContext, call: &ToolCall) -> Result<ToolResponse> {
        let params: SourcegraphParams = match call.decode() {
            Ok(p) => p,
            Err(e) => {
                return Ok(ToolResponse::error(format!(
                    "Failed to parse sourcegraph parameters: {e}"
                )));
            }
        };
        if params.query.is_empty() {
            return Ok(ToolResponse::error("Query parameter is required"));
        }
        let count = match params.count {
            0 => DEFAULT_COUNT,
            n => n.min(MAX_COUNT),
        };
        let context_window = match params.context_window {
            0 => DEFAULT_CONTEXT_WINDOW,
            n => n,
        };

        let endpoint = &self.services.search.sourcegraph_endpoint;
        let mut request = self.services.http.post(endpoint).json(&json!({
            "query": SEARCH_QUERY,
            "variables": { "query": params.query },
        }));
        if params.timeout > 0 {
            request = request.timeout(Duration::from_secs(params.timeout.min(MAX_TIMEOUT_SECS)));
        }
        info!(query = %params.query, count, "searching sourcegraph");

        let exchange = async {
            let response = request
                .send()
                .await
                .map_err(|e| KilnError::Http(format!("failed to fetch URL: {e}")))?;
            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| KilnError::Http(format!("failed to read response body: {e}")))?;
            Ok::<_, KilnError>((status, body))
        };
        let (status, body) = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(KilnError::Cancelled),
            res = exchange => res?,
        };

        if status != reqwest::StatusCode::OK {
            let message = if body.is_empty() {
                format!("Request failed with status code: {}", status.as_u16())
            } else {
                format!(
                    "Request failed with status code: {}, response: {body}",
                    status.as_u16()
                )
            };
            return Ok(ToolResponse::error(message));
        }

        let response: GraphqlResponse = serde_json::from_str(&body)?;
        debug!(
            results = response
                .data
                .as_ref()
                .map(|d| d.search.results.results.len())
                .unwrap_or_default(),
            "sourcegraph responded"
        );
        match format_results(&response, context_window) {
            Ok(text) => Ok(ToolResponse::text(text)),
            Err(e) => Ok(ToolResponse::error(format!("Failed to format results: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(value: serde_json::Value) -> GraphqlResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn api_errors_are_listed() {
        let response = parse(json!({ "errors": [{ "message": "bad query" }] }));
        assert_eq!(
            format_results(&response, 10).unwrap(),
            "## Sourcegraph API Error\n\n- bad query\n"
        );
    }

    #[test]
    fn empty_results() {
        let response = parse(json!({
            "data": { "search": { "results": {
                "matchCount": 0, "resultCount": 0, "limitHit": false, "results": []
            }}}
        }));
        assert_eq!(
            format_results(&response, 10).unwrap(),
            "# Sourcegraph Search Results\n\nFound 0 matches across 0 results\n\nNo results found. Try a different query.\n"
        );
    }

    #[test]
    fn file_match_with_context() {
        let response = parse(json!({
            "data": { "search": { "results": {
                "matchCount": 1, "resultCount": 1, "limitHit": true,
                "results": [
                    { "__typename": "Repository", "name": "ignored" },
                    {
                        "__typename": "FileMatch",
                        "repository": { "name": "github.com/a/b" },
                        "file": { "path": "src/lib.rs", "url": "/a/b/-/blob/src/lib.rs", "content": "one\ntwo\nthree\nfour" },
                        "lineMatches": [{ "preview": "three", "lineNumber": 3 }]
                    }
                ]
            }}}
        }));
        let text = format_results(&response, 1).unwrap();
        assert!(text.contains("(Result limit reached, try a more specific query)\n"));
        assert!(text.contains(
            "## Result 2: github.com/a/b/src/lib.rs\n\nURL: /a/b/-/blob/src/lib.rs\n\n```\n2| two\n3|  three\n4| four\n```\n\n"
        ));
    }

    #[test]
    fn missing_data_is_a_format_error() {
        let response = parse(json!({}));
        assert!(format_results(&response, 10).is_err());
    }
}
