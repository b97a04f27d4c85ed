//! Built-in tools.
//!
//! Each tool is its own type implementing [`kiln_core::Tool`]. The helpers
//! in this module carry the protocol every mutating tool follows: resolve
//! the path, check it was read and not changed since, ask for permission,
//! write, then update the ledger and history and wait for diagnostics.

use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use kiln_autonomy::{CreatePermissionRequest, permission_path};
use kiln_config::AgentConfig;
use kiln_core::{KilnError, Result, SessionId, Tool, ToolCall, ToolContext, ToolInfo, ToolResponse};
use kiln_llm::LlmProvider;

use crate::services::ToolServices;

pub mod agent;
pub mod bash;
pub mod diagnostics;
pub mod edit;
pub mod fetch;
pub mod glob;
pub mod grep;
pub mod ls;
pub mod multi_patch;
pub mod patch;
pub mod sourcegraph;
pub mod todo;
pub mod view;
pub mod web_search;
pub mod write;

pub use agent::AgentTool;
pub use bash::BashTool;
pub use diagnostics::DiagnosticsTool;
pub use edit::EditTool;
pub use fetch::FetchTool;
pub use glob::GlobTool;
pub use grep::GrepTool;
pub use ls::LsTool;
pub use multi_patch::MultiPatchTool;
pub use patch::PatchTool;
pub use sourcegraph::SourcegraphTool;
pub use todo::{TodoReadTool, TodoWriteTool};
pub use view::ViewTool;
pub use web_search::WebSearchTool;
pub use write::WriteTool;

/// Every built-in tool except `agent`, which needs a model provider.
pub fn builtin_tools(services: &Arc<ToolServices>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(BashTool::new(services.clone())),
        Arc::new(EditTool::new(services.clone())),
        Arc::new(WriteTool::new(services.clone())),
        Arc::new(PatchTool::new(services.clone())),
        Arc::new(MultiPatchTool::new(services.clone())),
        Arc::new(ViewTool::new(services.clone())),
        Arc::new(LsTool::new(services.clone())),
        Arc::new(GlobTool::new(services.clone())),
        Arc::new(GrepTool::new(services.clone())),
        Arc::new(DiagnosticsTool::new(services.clone())),
        Arc::new(FetchTool::new(services.clone())),
        Arc::new(SourcegraphTool::new(services.clone())),
        Arc::new(WebSearchTool::new(services.clone())),
        Arc::new(TodoWriteTool::new(services.clone())),
        Arc::new(TodoReadTool::new(services.clone())),
    ]
}

/// The full set for the main agent: every built-in plus `agent`, whose
/// runs use the `task` profile.
pub fn coder_tools(
    services: &Arc<ToolServices>,
    provider: Arc<dyn LlmProvider>,
    task_agent: &AgentConfig,
) -> Vec<Arc<dyn Tool>> {
    let mut tools = builtin_tools(services);
    tools.push(Arc::new(AgentTool::new(services.clone(), provider, task_agent)));
    tools
}

/// Tools a sub-agent may use. None of them writes files.
pub fn read_only_tools(services: &Arc<ToolServices>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(BashTool::new(services.clone())),
        Arc::new(LsTool::new(services.clone())),
        Arc::new(GlobTool::new(services.clone())),
        Arc::new(ViewTool::new(services.clone())),
    ]
}

// ── Shared helpers ─────────────────────────────────────────────

pub(crate) fn tool_info(
    name: &str,
    description: &str,
    parameters: Value,
    required: &[&str],
) -> ToolInfo {
    ToolInfo {
        name: name.to_string(),
        description: description.to_string(),
        parameters,
        required: required.iter().map(|s| s.to_string()).collect(),
    }
}

/// Decode typed parameters, or the `invalid parameters` response the
/// model sees.
pub(crate) fn decode_params<T: DeserializeOwned>(
    call: &ToolCall,
) -> std::result::Result<T, ToolResponse> {
    call.decode()
        .map_err(|e| ToolResponse::error(format!("invalid parameters: {e}")))
}

pub(crate) fn rfc3339(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// The read-before-modify and stale-read checks. `verb` finishes the
/// sentence "you must read the file before ...".
pub(crate) fn check_fresh_read(
    services: &ToolServices,
    path: &Path,
    modified: SystemTime,
    verb: &str,
) -> Option<ToolResponse> {
    let Some(last_read) = services.ledger.last_read(path) else {
        return Some(ToolResponse::error(format!(
            "you must read the file before {verb} it. Use the View tool first"
        )));
    };
    if modified > last_read {
        return Some(modified_since_read(path, modified, last_read));
    }
    None
}

fn modified_since_read(path: &Path, modified: SystemTime, last_read: SystemTime) -> ToolResponse {
    ToolResponse::error(format!(
        "file {} has been modified since it was last read (mod time: {}, last read: {})",
        path.display(),
        rfc3339(modified),
        rfc3339(last_read),
    ))
}

/// Repeat the freshness checks right before writing, once permission has
/// been granted. `expected` is the content the change was computed from,
/// `None` when the file did not exist. A file that changed in between is
/// reported as stale and left alone.
pub(crate) fn check_unchanged(
    services: &ToolServices,
    path: &Path,
    expected: Option<&str>,
    verb: &str,
) -> Result<Option<ToolResponse>> {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(expected.map(|_| {
                ToolResponse::error(format!(
                    "file {} was removed while waiting for permission",
                    path.display()
                ))
            }));
        }
        Err(e) => return Err(e.into()),
    };
    let Some(expected) = expected else {
        return Ok(Some(ToolResponse::error(format!(
            "file {} was created while waiting for permission. Use the View tool to read it first",
            path.display()
        ))));
    };
    let modified = meta.modified()?;
    if let Some(resp) = check_fresh_read(services, path, modified, verb) {
        return Ok(Some(resp));
    }
    if std::fs::read_to_string(path)? != expected {
        let last_read = services.ledger.last_read(path).unwrap_or(modified);
        return Ok(Some(modified_since_read(path, modified, last_read)));
    }
    Ok(None)
}

/// Ask the broker; a refusal becomes [`KilnError::PermissionDenied`].
pub(crate) async fn require_permission(
    services: &ToolServices,
    ctx: &ToolContext,
    tool_name: &str,
    action: &str,
    path: String,
    description: String,
    params: Value,
) -> Result<()> {
    let granted = services
        .permissions
        .request(
            &ctx.cancel,
            CreatePermissionRequest {
                session_id: ctx.session_id,
                tool_name: tool_name.to_string(),
                action: action.to_string(),
                description,
                path,
                params,
            },
        )
        .await?;
    if granted {
        Ok(())
    } else {
        Err(KilnError::PermissionDenied)
    }
}

/// Permission scope for a file: its directory.
pub(crate) fn file_scope(services: &ToolServices, path: &Path) -> String {
    permission_path(path, &services.working_dir)
}

/// Record a write in the session's history.
///
/// `old` is the content before the write, `None` when the file did not
/// exist. If the latest stored version no longer matches what was on disk
/// (the user edited the file), the on-disk state is saved first so the
/// history shows both steps. Failures are logged, not returned.
pub(crate) fn record_history(
    services: &ToolServices,
    session: SessionId,
    path: &Path,
    old: Option<&str>,
    new: &str,
) {
    let key = path.display().to_string();
    let history = &services.history;
    let outcome = match history.get_by_path_and_session(&key, session) {
        Err(_) => match old {
            None => history.create(session, &key, new).map(|_| ()),
            Some(old) => history
                .create(session, &key, old)
                .and_then(|_| history.create_version(session, &key, new))
                .map(|_| ()),
        },
        Ok(latest) => {
            let intermediate = match old {
                Some(old) if latest.content != old => {
                    history.create_version(session, &key, old).map(|_| ())
                }
                _ => Ok(()),
            };
            intermediate
                .and_then(|_| history.create_version(session, &key, new))
                .map(|_| ())
        }
    };
    if let Err(e) = outcome {
        warn!(path = %key, session_id = %session, error = %e, "failed to record file history");
    }
}

/// Mark `path` as written and read now, so a follow-up edit is not
/// reported as stale.
pub(crate) fn record_access(services: &ToolServices, path: &Path) {
    services.ledger.record_write(path);
    services.ledger.record_read(path);
}

/// Wait for fresh diagnostics on `path` and render them. Empty when no
/// language server is running.
pub(crate) async fn diagnostics_for(
    services: &ToolServices,
    ctx: &ToolContext,
    path: &Path,
) -> String {
    if !services.diagnostics.has_clients() {
        return String::new();
    }
    services.diagnostics.wait_for_diagnostics(&ctx.cancel, path).await;
    services.diagnostics.render(Some(path))
}

/// `<result>` block followed by any diagnostics.
pub(crate) fn result_block(message: &str, diagnostics: &str) -> String {
    format!("<result>\n{message}\n</result>\n{diagnostics}")
}

/// Files and directories no listing or search descends into.
pub(crate) const IGNORED_NAMES: &[&str] = &[
    "node_modules",
    "__pycache__",
    ".git",
    "build",
    "target",
    "dist",
    "vendor",
    "bin",
    "obj",
    ".idea",
    ".vscode",
    ".cache",
    ".venv",
    "venv",
];

pub(crate) const IGNORED_EXTENSIONS: &[&str] = &[
    "pyc", "pyo", "o", "a", "so", "dylib", "dll", "exe", "class", "jar",
];

pub(crate) fn is_hidden(name: &str) -> bool {
    name != "." && name.starts_with('.')
}

pub(crate) fn is_ignored_name(name: &str) -> bool {
    if is_hidden(name) || IGNORED_NAMES.contains(&name) {
        return true;
    }
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IGNORED_EXTENSIONS.contains(&ext))
}

/// Compile a glob supporting `**` and `{a,b}`. A single `*` does not
/// cross `/`.
pub(crate) fn build_glob(pattern: &str) -> std::result::Result<globset::GlobMatcher, String> {
    globset::GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|g| g.compile_matcher())
        .map_err(|e| format!("invalid glob pattern: {e}"))
}

/// Modification time, falling back to the epoch when unavailable.
pub(crate) fn mtime(path: &Path) -> SystemTime {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignored_names() {
        assert!(is_ignored_name(".env"));
        assert!(is_ignored_name("node_modules"));
        assert!(is_ignored_name("main.pyc"));
        assert!(!is_ignored_name("main.rs"));
        assert!(!is_hidden("."));
    }

    #[test]
    fn glob_braces_and_separators() {
        let m = build_glob("**/*.{rs,toml}").unwrap();
        assert!(m.is_match("src/lib.rs"));
        assert!(m.is_match("Cargo.toml"));
        assert!(!m.is_match("README.md"));
        let flat = build_glob("*.rs").unwrap();
        assert!(!flat.is_match("src/lib.rs"));
    }

    #[test]
    fn rfc3339_is_utc_seconds() {
        assert_eq!(rfc3339(SystemTime::UNIX_EPOCH), "1970-01-01T00:00:00Z");
    }
}
