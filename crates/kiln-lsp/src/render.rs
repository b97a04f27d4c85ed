//! Text rendering of collected diagnostics for tool responses.

use std::collections::HashMap;
use std::path::Path;

use crate::protocol::{Diagnostic, DiagnosticSeverity, DiagnosticTag, uri_to_path};

/// Lines kept per block before the `... and N more` tail.
pub const MAX_DIAGNOSTICS_PER_BLOCK: usize = 10;

fn severity_label(severity: Option<DiagnosticSeverity>) -> &'static str {
    match severity {
        Some(DiagnosticSeverity::Error) => "Error",
        Some(DiagnosticSeverity::Warning) => "Warn",
        Some(DiagnosticSeverity::Hint) => "Hint",
        _ => "Info",
    }
}

/// `Error: path:line:col [source][code] (tags) message`, one-based.
pub fn format_diagnostic(path: &str, d: &Diagnostic, server: &str) -> String {
    let source = d
        .source
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or(server);

    let code = match &d.code {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => format!("[{s}]"),
        Some(other) => format!("[{other}]"),
    };

    let tags: Vec<&str> = d
        .tags
        .iter()
        .flatten()
        .filter_map(|t| match t {
            DiagnosticTag::Unnecessary => Some("unnecessary"),
            DiagnosticTag::Deprecated => Some("deprecated"),
            DiagnosticTag::Other(_) => None,
        })
        .collect();
    let tags = if tags.is_empty() {
        String::new()
    } else {
        format!(" ({})", tags.join(", "))
    };

    format!(
        "{}: {}:{}:{} [{}]{}{} {}",
        severity_label(d.severity),
        path,
        d.range.start.line + 1,
        d.range.start.character + 1,
        source,
        code,
        tags,
        d.message
    )
}

fn sort_error_first(lines: &mut [String]) {
    lines.sort_by(|a, b| {
        let (ae, be) = (a.starts_with("Error"), b.starts_with("Error"));
        be.cmp(&ae).then_with(|| a.cmp(b))
    });
}

fn push_block(out: &mut String, tag: &str, lines: &[String]) {
    if lines.is_empty() {
        return;
    }
    out.push_str(&format!("\n<{tag}>\n"));
    let shown = lines.len().min(MAX_DIAGNOSTICS_PER_BLOCK);
    out.push_str(&lines[..shown].join("\n"));
    if lines.len() > shown {
        out.push_str(&format!(
            "\n... and {} more diagnostics",
            lines.len() - shown
        ));
    }
    out.push_str(&format!("\n</{tag}>\n"));
}

fn count(lines: &[String], prefix: &str) -> usize {
    lines.iter().filter(|l| l.starts_with(prefix)).count()
}

/// Render diagnostics from every server. Entries for `current` go to the
/// `<file_diagnostics>` block, everything else to `<project_diagnostics>`.
/// Returns an empty string when there is nothing to report.
pub fn render_diagnostics(
    current: Option<&Path>,
    sources: &[(String, HashMap<String, Vec<Diagnostic>>)],
) -> String {
    let mut file_lines = Vec::new();
    let mut project_lines = Vec::new();

    for (server, by_uri) in sources {
        for (uri, diags) in by_uri {
            let path = uri_to_path(uri);
            if !path.exists() {
                continue;
            }
            let is_current = current.is_some_and(|c| c == path);
            let shown = path.display().to_string();
            for d in diags {
                let line = format_diagnostic(&shown, d, server);
                if is_current {
                    file_lines.push(line);
                } else {
                    project_lines.push(line);
                }
            }
        }
    }

    sort_error_first(&mut file_lines);
    sort_error_first(&mut project_lines);

    let mut out = String::new();
    push_block(&mut out, "file_diagnostics", &file_lines);
    push_block(&mut out, "project_diagnostics", &project_lines);

    if !file_lines.is_empty() || !project_lines.is_empty() {
        out.push_str("\n<diagnostic_summary>\n");
        out.push_str(&format!(
            "Current file: {} errors, {} warnings\n",
            count(&file_lines, "Error"),
            count(&file_lines, "Warn")
        ));
        out.push_str(&format!(
            "Project: {} errors, {} warnings\n",
            count(&project_lines, "Error"),
            count(&project_lines, "Warn")
        ));
        out.push_str("</diagnostic_summary>\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Position, Range};

    fn diag(line: u32, sev: Option<DiagnosticSeverity>, msg: &str) -> Diagnostic {
        Diagnostic {
            range: Range {
                start: Position { line, character: 0 },
                end: Position { line, character: 1 },
            },
            severity: sev,
            code: None,
            source: None,
            message: msg.into(),
            tags: None,
        }
    }

    #[test]
    fn format_uses_server_name_when_source_missing() {
        let d = diag(0, Some(DiagnosticSeverity::Warning), "unused");
        assert_eq!(
            format_diagnostic("/a.rs", &d, "rust"),
            "Warn: /a.rs:1:1 [rust] unused"
        );
    }

    #[test]
    fn format_includes_code_and_known_tags() {
        let mut d = diag(4, None, "old api");
        d.source = Some("gopls".into());
        d.code = Some(serde_json::json!(42));
        d.tags = Some(vec![
            DiagnosticTag::Deprecated,
            DiagnosticTag::Other(9),
            DiagnosticTag::Unnecessary,
        ]);
        assert_eq!(
            format_diagnostic("/m.go", &d, "go"),
            "Info: /m.go:5:1 [gopls][42] (deprecated, unnecessary) old api"
        );
    }

    #[test]
    fn errors_sort_before_others() {
        let mut lines = vec![
            "Warn: b".to_string(),
            "Error: z".to_string(),
            "Hint: a".to_string(),
            "Error: c".to_string(),
        ];
        sort_error_first(&mut lines);
        assert_eq!(lines, ["Error: c", "Error: z", "Hint: a", "Warn: b"]);
    }
}
