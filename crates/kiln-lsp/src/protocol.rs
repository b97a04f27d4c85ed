//! The slice of LSP types the collector needs.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Information,
    Hint,
}

impl From<u8> for DiagnosticSeverity {
    fn from(v: u8) -> Self {
        match v {
            1 => DiagnosticSeverity::Error,
            2 => DiagnosticSeverity::Warning,
            4 => DiagnosticSeverity::Hint,
            _ => DiagnosticSeverity::Information,
        }
    }
}

impl From<DiagnosticSeverity> for u8 {
    fn from(s: DiagnosticSeverity) -> u8 {
        match s {
            DiagnosticSeverity::Error => 1,
            DiagnosticSeverity::Warning => 2,
            DiagnosticSeverity::Information => 3,
            DiagnosticSeverity::Hint => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum DiagnosticTag {
    Unnecessary,
    Deprecated,
    Other(u8),
}

impl From<u8> for DiagnosticTag {
    fn from(v: u8) -> Self {
        match v {
            1 => DiagnosticTag::Unnecessary,
            2 => DiagnosticTag::Deprecated,
            n => DiagnosticTag::Other(n),
        }
    }
}

impl From<DiagnosticTag> for u8 {
    fn from(t: DiagnosticTag) -> u8 {
        match t {
            DiagnosticTag::Unnecessary => 1,
            DiagnosticTag::Deprecated => 2,
            DiagnosticTag::Other(n) => n,
        }
    }
}

/// A single issue reported by a language server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub range: Range,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<DiagnosticSeverity>,
    /// Number or string, as the server sent it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<DiagnosticTag>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishDiagnosticsParams {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    pub diagnostics: Vec<Diagnostic>,
}

/// `file://` URI for an absolute path.
pub fn path_to_uri(path: &Path) -> String {
    url::Url::from_file_path(path)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| format!("file://{}", path.display()))
}

/// Filesystem path named by a `file://` URI.
pub fn uri_to_path(uri: &str) -> PathBuf {
    url::Url::parse(uri)
        .ok()
        .and_then(|u| u.to_file_path().ok())
        .unwrap_or_else(|| PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_parses_server_payload() {
        let raw = r#"{
            "range": {"start": {"line": 2, "character": 4}, "end": {"line": 2, "character": 9}},
            "severity": 1, "code": "E0308", "source": "rustc",
            "message": "mismatched types", "tags": [1]
        }"#;
        let d: Diagnostic = serde_json::from_str(raw).unwrap();
        assert_eq!(d.severity, Some(DiagnosticSeverity::Error));
        assert_eq!(d.tags, Some(vec![DiagnosticTag::Unnecessary]));
        assert_eq!(d.range.start.line, 2);
    }

    #[test]
    fn uri_roundtrip() {
        let p = Path::new("/tmp/some dir/a.rs");
        let uri = path_to_uri(p);
        assert!(uri.starts_with("file:///tmp/some%20dir"));
        assert_eq!(uri_to_path(&uri), p);
    }
}
