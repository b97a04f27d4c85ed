//! Live web search. Parameters follow the provider-side search API; when no
//! search endpoint is configured the tool validates the request and
//! describes it, leaving the search to a model that runs it natively.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use kiln_core::{KilnError, Result, Tool, ToolCall, ToolContext, ToolInfo, ToolResponse};

use super::tool_info;
use crate::services::ToolServices;

pub const NAME: &str = "web_search";

const MAX_RESULTS: i64 = 20;
const MAX_WEBSITES: usize = 5;
const MAX_HANDLES: usize = 10;

const DESCRIPTION: &str = "Searches the web for current information. Supports several data \
sources (web, x, news, rss), date filtering and citations. Dates use the YYYY-MM-DD format.";

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WebSearchParams {
    #[serde(default)]
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_search_results: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_citations: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SearchSource>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SearchSource {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_websites: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_websites: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safe_search: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included_x_handles: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_x_handles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_favorite_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_view_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SearchParamError {
    #[error("mode must be 'auto', 'on', or 'off', got: {0}")]
    Mode(String),
    #[error("max_search_results must be between 1 and 20, got: {0}")]
    MaxResults(i64),
    #[error("{field} must be in YYYY-MM-DD format, got: {value}")]
    Date { field: &'static str, value: String },
    #[error("source {index}: {reason}")]
    Source { index: usize, reason: String },
}

impl SearchSource {
    fn has_x_params(&self) -> bool {
        !self.included_x_handles.is_empty()
            || !self.excluded_x_handles.is_empty()
            || self.post_favorite_count.is_some()
            || self.post_view_count.is_some()
    }

    fn has_web_params(&self) -> bool {
        self.country.is_some()
            || !self.excluded_websites.is_empty()
            || !self.allowed_websites.is_empty()
            || self.safe_search.is_some()
    }

    /// Check list sizes and that only parameters meaningful for the
    /// source type are set.
    fn validate(&self) -> std::result::Result<(), String> {
        if !matches!(self.kind.as_str(), "web" | "x" | "news" | "rss") {
            return Err(format!(
                "invalid source type: {} (must be web, x, news, or rss)",
                self.kind
            ));
        }
        if self.excluded_websites.len() > MAX_WEBSITES {
            return Err(format!(
                "excluded_websites cannot exceed 5 entries, got: {}",
                self.excluded_websites.len()
            ));
        }
        if self.allowed_websites.len() > MAX_WEBSITES {
            return Err(format!(
                "allowed_websites cannot exceed 5 entries, got: {}",
                self.allowed_websites.len()
            ));
        }
        if !self.excluded_websites.is_empty() && !self.allowed_websites.is_empty() {
            return Err(
                "cannot use both excluded_websites and allowed_websites in the same source".into(),
            );
        }
        if self.included_x_handles.len() > MAX_HANDLES {
            return Err(format!(
                "included_x_handles cannot exceed 10 entries, got: {}",
                self.included_x_handles.len()
            ));
        }
        if self.excluded_x_handles.len() > MAX_HANDLES {
            return Err(format!(
                "excluded_x_handles cannot exceed 10 entries, got: {}",
                self.excluded_x_handles.len()
            ));
        }
        if !self.included_x_handles.is_empty() && !self.excluded_x_handles.is_empty() {
            return Err(
                "cannot use both included_x_handles and excluded_x_handles in the same source"
                    .into(),
            );
        }
        if self.links.len() > 1 {
            return Err(format!(
                "RSS source can only have 1 link, got: {}",
                self.links.len()
            ));
        }

        match self.kind.as_str() {
            "web" => {
                if self.has_x_params() {
                    return Err("X-specific parameters not allowed for web source".into());
                }
                if !self.links.is_empty() {
                    return Err("RSS links not allowed for web source".into());
                }
            }
            "x" => {
                if self.has_web_params() {
                    return Err("web/news-specific parameters not allowed for X source".into());
                }
                if !self.links.is_empty() {
                    return Err("RSS links not allowed for X source".into());
                }
            }
            "news" => {
                if self.has_x_params() {
                    return Err("X-specific parameters not allowed for news source".into());
                }
                if !self.allowed_websites.is_empty() {
                    return Err("allowed_websites not supported for news source".into());
                }
                if !self.links.is_empty() {
                    return Err("RSS links not allowed for news source".into());
                }
            }
            _ => {
                if self.has_web_params() || self.has_x_params() {
                    return Err("only links parameter allowed for RSS source".into());
                }
                if self.links.is_empty() {
                    return Err("RSS source requires at least one link".into());
                }
            }
        }
        Ok(())
    }
}

fn check_date(
    field: &'static str,
    value: &Option<String>,
) -> std::result::Result<(), SearchParamError> {
    match value {
        Some(v) if NaiveDate::parse_from_str(v, "%Y-%m-%d").is_err() || v.len() != 10 => {
            Err(SearchParamError::Date {
                field,
                value: v.clone(),
            })
        }
        _ => Ok(()),
    }
}

impl WebSearchParams {
    pub fn validate(&self) -> std::result::Result<(), SearchParamError> {
        if let Some(mode) = &self.mode {
            if !matches!(mode.as_str(), "auto" | "on" | "off") {
                return Err(SearchParamError::Mode(mode.clone()));
            }
        }
        if let Some(n) = self.max_search_results {
            if !(1..=MAX_RESULTS).contains(&n) {
                return Err(SearchParamError::MaxResults(n));
            }
        }
        check_date("from_date", &self.from_date)?;
        check_date("to_date", &self.to_date)?;
        for (index, source) in self.sources.iter().enumerate() {
            source
                .validate()
                .map_err(|reason| SearchParamError::Source { index, reason })?;
        }
        Ok(())
    }

    /// One-line summary of the resolved search.
    pub fn describe(&self) -> String {
        let mut out = format!("Searching the web for: {}", self.query);
        if let Some(mode) = self.mode.as_deref().filter(|m| *m != "auto") {
            out.push_str(&format!(" (mode: {mode})"));
        }
        if let Some(n) = self.max_search_results {
            out.push_str(&format!(" (max results: {n})"));
        }
        match (&self.from_date, &self.to_date) {
            (Some(from), Some(to)) => out.push_str(&format!(" (date range: {from} to {to})")),
            (Some(from), None) => out.push_str(&format!(" (from: {from})")),
            (None, Some(to)) => out.push_str(&format!(" (until: {to})")),
            (None, None) => {}
        }
        if !self.sources.is_empty() {
            let kinds: Vec<&str> = self.sources.iter().map(|s| s.kind.as_str()).collect();
            out.push_str(&format!(" (sources: [{}])", kinds.join(" ")));
        }
        out
    }
}

pub struct WebSearchTool {
    services: Arc<ToolServices>,
}

impl WebSearchTool {
    pub fn new(services: Arc<ToolServices>) -> Self {
        Self { services }
    }

    async fn search(
        &self,
        ctx: &ToolContext,
        endpoint: &str,
        params: &WebSearchParams,
    ) -> Result<ToolResponse> {
        let mut request = self.services.http.post(endpoint).json(params);
        if let Some(var) = &self.services.search.web_search_api_key_env {
            if let Ok(key) = std::env::var(var) {
                request = request.bearer_auth(key);
            }
        }
        let exchange = async {
            let response = request
                .send()
                .await
                .map_err(|e| KilnError::Http(format!("web search request failed: {e}")))?;
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
        debug!(status = status.as_u16(), bytes = body.len(), "web search responded");
        if !status.is_success() {
            return Ok(ToolResponse::error(format!(
                "Request failed with status code: {}",
                status.as_u16()
            )));
        }
        Ok(ToolResponse::text(format!("{}\n\n{body}", params.describe())))
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn info(&self) -> ToolInfo {
        tool_info(
            NAME,
            DESCRIPTION,
            json!({
                "query": {
                    "type": "string",
                    "description": "The search query to execute"
                },
                "mode": {
                    "type": "string",
                    "description": "Search mode: 'auto' (default), 'on', or 'off'",
                    "enum": ["auto", "on", "off"]
                },
                "max_search_results": {
                    "type": "integer",
                    "description": "Maximum number of search results (1-20, default: 20)",
                    "minimum": 1,
                    "maximum": 20
                },
                "from_date": {
                    "type": "string",
                    "description": "Start date for search results in YYYY-MM-DD format",
                    "pattern": "^\\d{4}-\\d{2}-\\d{2}$"
                },
                "to_date": {
                    "type": "string",
                    "description": "End date for search results in YYYY-MM-DD format",
                    "pattern": "^\\d{4}-\\d{2}-\\d{2}$"
                },
                "return_citations": {
                    "type": "boolean",
                    "description": "Whether to return citations (default: true)"
                },
                "sources": {
                    "type": "array",
                    "description": "List of data sources to search",
                    "items": {
                        "type": "object",
                        "properties": {
                            "type": {
                                "type": "string",
                                "description": "Source type",
                                "enum": ["web", "x", "news", "rss"]
                            },
                            "country": {
                                "type": "string",
                                "description": "ISO alpha-2 country code (web, news)",
                                "pattern": "^[A-Z]{2}$"
                            },
                            "excluded_websites": {
                                "type": "array",
                                "description": "Websites to exclude (max 5, web/news)",
                                "items": { "type": "string" },
                                "maxItems": 5
                            },
                            "allowed_websites": {
                                "type": "array",
                                "description": "Allowed websites only (max 5, web only)",
                                "items": { "type": "string" },
                                "maxItems": 5
                            },
                            "safe_search": {
                                "type": "boolean",
                                "description": "Enable safe search (default: true, web/news)"
                            },
                            "included_x_handles": {
                                "type": "array",
                                "description": "X handles to include (max 10, x only)",
                                "items": { "type": "string" },
                                "maxItems": 10
                            },
                            "excluded_x_handles": {
                                "type": "array",
                                "description": "X handles to exclude (max 10, x only)",
                                "items": { "type": "string" },
                                "maxItems": 10
                            },
                            "post_favorite_count": {
                                "type": "integer",
                                "description": "Minimum favorite count for X posts",
                                "minimum": 0
                            },
                            "post_view_count": {
                                "type": "integer",
                                "description": "Minimum view count for X posts",
                                "minimum": 0
                            },
                            "links": {
                                "type": "array",
                                "description": "RSS feed URLs (1 link max, rss only)",
                                "items": { "type": "string", "format": "uri" },
                                "maxItems": 1
                            }
                        },
                        "required": ["type"]
                    }
                }
            }),
            &["query"],
        )
    }

    async fn run(&self, ctx: &ToolContext, call: &ToolCall) -> Result<ToolResponse> {
        let params: WebSearchParams = match call.decode() {
            Ok(p) => p,
            Err(e) => {
                return Ok(ToolResponse::error(format!(
                    "Failed to parse web search parameters: {e}"
                )));
            }
        };
        if params.query.is_empty() {
            return Ok(ToolResponse::error("Search query cannot be empty"));
        }
        if let Err(e) = params.validate() {
            return Ok(ToolResponse::error(format!(
                "Invalid Live Search parameters: {e}"
            )));
        }

        match self.services.search.web_search_endpoint.as_deref() {
            Some(endpoint) => {
                info!(query = %params.query, %endpoint, "running web search");
                self.search(ctx, endpoint, &params).await
            }
            None => Ok(ToolResponse::text(params.describe())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(kind: &str) -> SearchSource {
        SearchSource {
            kind: kind.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn describes_the_search() {
        let params = WebSearchParams {
            query: "rust 2024".into(),
            mode: Some("on".into()),
            max_search_results: Some(5),
            from_date: Some("2025-01-01".into()),
            to_date: Some("2025-02-01".into()),
            sources: vec![source("web"), source("news")],
            ..Default::default()
        };
        assert!(params.validate().is_ok());
        assert_eq!(
            params.describe(),
            "Searching the web for: rust 2024 (mode: on) (max results: 5) \
             (date range: 2025-01-01 to 2025-02-01) (sources: [web news])"
        );
    }

    #[test]
    fn top_level_limits() {
        let bad_mode = WebSearchParams {
            mode: Some("always".into()),
            ..Default::default()
        };
        assert_eq!(
            bad_mode.validate().unwrap_err().to_string(),
            "mode must be 'auto', 'on', or 'off', got: always"
        );
        let too_many = WebSearchParams {
            max_search_results: Some(21),
            ..Default::default()
        };
        assert!(matches!(too_many.validate(), Err(SearchParamError::MaxResults(21))));
        let bad_date = WebSearchParams {
            to_date: Some("01/02/2025".into()),
            ..Default::default()
        };
        assert_eq!(
            bad_date.validate().unwrap_err().to_string(),
            "to_date must be in YYYY-MM-DD format, got: 01/02/2025"
        );
    }

    #[test]
    fn per_source_rules() {
        let mut rss = source("rss");
        assert_eq!(rss.validate().unwrap_err(), "RSS source requires at least one link");
        rss.links = vec!["https://a/feed".into(), "https://b/feed".into()];
        assert_eq!(rss.validate().unwrap_err(), "RSS source can only have 1 link, got: 2");

        let mut x = source("x");
        x.safe_search = Some(true);
        assert_eq!(
            x.validate().unwrap_err(),
            "web/news-specific parameters not allowed for X source"
        );

        let mut news = source("news");
        news.allowed_websites = vec!["a.com".into()];
        assert_eq!(
            news.validate().unwrap_err(),
            "allowed_websites not supported for news source"
        );

        let mut web = source("web");
        web.excluded_websites = (0..6).map(|i| format!("{i}.com")).collect();
        assert!(web.validate().unwrap_err().contains("cannot exceed 5"));

        assert!(source("gopher").validate().unwrap_err().starts_with("invalid source type"));

        let params = WebSearchParams {
            query: "q".into(),
            sources: vec![source("web"), source("rss")],
            ..Default::default()
        };
        assert_eq!(
            params.validate().unwrap_err().to_string(),
            "source 1: RSS source requires at least one link"
        );
    }
}
