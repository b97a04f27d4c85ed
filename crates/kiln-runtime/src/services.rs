use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use kiln_autonomy::{CommandPolicy, PermissionBroker};
use kiln_config::{KilnConfig, SearchConfig};
use kiln_core::{FileLedger, HistoryService, KilnError, Result, SessionStore};
use kiln_lsp::DiagnosticsCollector;
use tracing::{debug, warn};

use crate::shell::{ShellPool, ShellSettings};

/// Timeout for HTTP clients built here. Tools override it per request.
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub const USER_AGENT: &str = "kiln/1.0";

/// Everything a tool needs besides its own parameters. One instance is
/// shared by every tool of an agent.
pub struct ToolServices {
    pub working_dir: PathBuf,
    pub ledger: Arc<FileLedger>,
    pub history: Arc<HistoryService>,
    pub permissions: Arc<PermissionBroker>,
    pub diagnostics: Arc<DiagnosticsCollector>,
    pub shells: Arc<ShellPool>,
    pub sessions: Arc<SessionStore>,
    pub policy: CommandPolicy,
    pub http: reqwest::Client,
    pub search: SearchConfig,
}

impl ToolServices {
    /// Fresh services rooted at `working_dir` with default settings and no
    /// language servers.
    pub fn new(working_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            working_dir: working_dir.into(),
            ledger: Arc::new(FileLedger::new()),
            history: Arc::new(HistoryService::new()),
            permissions: Arc::new(PermissionBroker::new()),
            diagnostics: Arc::new(DiagnosticsCollector::new()),
            shells: Arc::new(ShellPool::new(ShellSettings::default())),
            sessions: Arc::new(SessionStore::new()),
            policy: CommandPolicy::new(),
            http: build_http_client()?,
            search: SearchConfig::default(),
        })
    }

    /// Services configured from `config`. Language servers are not started
    /// here; see [`start_language_servers`](Self::start_language_servers).
    pub fn from_config(config: &KilnConfig, working_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut services = Self::new(working_dir)?;
        services.shells = Arc::new(ShellPool::new(ShellSettings::from(&config.shell)));
        services.policy = CommandPolicy::new()
            .with_banned(config.banned_commands.iter().cloned())
            .with_safe(config.safe_commands.iter().cloned());
        services.search = config.search.clone();
        Ok(services)
    }

    /// Start every enabled language server in `config`. Servers that fail
    /// to start are logged and skipped.
    pub async fn start_language_servers(&self, config: &KilnConfig) {
        for (language, lsp) in &config.lsp {
            if lsp.disabled || lsp.command.is_empty() {
                debug!(%language, "language server disabled");
                continue;
            }
            if let Err(e) = self
                .diagnostics
                .start(
                    language,
                    &lsp.command,
                    &lsp.args,
                    &self.working_dir,
                    lsp.options.clone(),
                )
                .await
            {
                warn!(%language, error = %e, "skipping language server");
            }
        }
    }

    /// Absolute form of a tool-supplied path. Relative paths are taken
    /// from the working directory.
    pub fn resolve_path(&self, raw: &str) -> PathBuf {
        let path = Path::new(raw);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        }
    }

    /// Stop shells and language servers.
    pub async fn shutdown(&self) {
        self.shells.close_all().await;
        self.diagnostics.shutdown().await;
    }
}

fn build_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(DEFAULT_HTTP_TIMEOUT)
        .build()
        .map_err(|e| KilnError::Http(e.to_string()))
}
