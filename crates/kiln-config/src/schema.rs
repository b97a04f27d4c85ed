use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration, read from `~/.kiln.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KilnConfig {
    /// Agent profiles keyed by name ("coder", "task").
    pub agents: BTreeMap<String, AgentConfig>,
    /// Which entry of `agents` drives the main loop.
    pub default_agent: String,
    /// Provider credentials keyed by provider name ("anthropic", "openai").
    pub providers: BTreeMap<String, ProviderConfig>,
    pub data: DataConfig,
    /// Root for relative paths. Defaults to the process working directory.
    pub working_dir: Option<PathBuf>,
    /// Default log level (trace, debug, info, warn, error).
    pub log_level: String,
    pub logging: LoggingConfig,
    pub shell: ShellConfig,
    /// Language servers keyed by language name ("rust", "go").
    pub lsp: BTreeMap<String, LspConfig>,
    pub search: SearchConfig,
    /// Extra commands refused by the bash tool.
    pub banned_commands: Vec<String>,
    /// Extra command prefixes the bash tool runs without asking.
    pub safe_commands: Vec<String>,
}

impl Default for KilnConfig {
    fn default() -> Self {
        let mut agents = BTreeMap::new();
        agents.insert("coder".to_string(), AgentConfig::default());
        agents.insert(
            "task".to_string(),
            AgentConfig {
                max_tokens: 5_000,
                ..AgentConfig::default()
            },
        );
        Self {
            agents,
            default_agent: "coder".into(),
            providers: BTreeMap::new(),
            data: DataConfig::default(),
            working_dir: None,
            log_level: "info".into(),
            logging: LoggingConfig::default(),
            shell: ShellConfig::default(),
            lsp: BTreeMap::new(),
            search: SearchConfig::default(),
            banned_commands: vec![],
            safe_commands: vec![],
        }
    }
}

// ── Agents & providers ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Model identifier, e.g. "anthropic/claude-sonnet-4".
    pub model: String,
    /// Maximum tokens per response.
    pub max_tokens: u32,
    /// Cap on model round-trips for a sub-agent run.
    pub max_iterations: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "anthropic/claude-sonnet-4".into(),
            max_tokens: 8_192,
            max_iterations: 20,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Inline key. Prefer `api_key_env`.
    pub api_key: Option<String>,
    /// Name of the environment variable holding the key.
    pub api_key_env: Option<String>,
    pub disabled: bool,
}

impl ProviderConfig {
    /// The effective key: inline first, then the named env var.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(k) = self.api_key.as_ref().filter(|k| !k.is_empty()) {
            return Some(k.clone());
        }
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty())
    }
}

// ── Storage, logging, shell ────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Transient artifacts, relative to the working directory.
    pub directory: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(".kiln"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// "pretty" or "json".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "pretty".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Shell binary. Falls back to `$SHELL`, then `/bin/bash`.
    pub path: Option<String>,
    pub args: Vec<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            path: None,
            args: vec!["-l".into()],
        }
    }
}

impl ShellConfig {
    pub fn resolve_path(&self) -> String {
        self.path
            .clone()
            .filter(|p| !p.is_empty())
            .or_else(|| std::env::var("SHELL").ok().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| "/bin/bash".into())
    }
}

// ── Language servers & search ──────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LspConfig {
    pub command: String,
    pub args: Vec<String>,
    pub disabled: bool,
    /// Passed verbatim as `initializationOptions`.
    pub options: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub sourcegraph_endpoint: String,
    /// Web search backend. When unset the tool only validates and
    /// describes the query.
    pub web_search_endpoint: Option<String>,
    pub web_search_api_key_env: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            sourcegraph_endpoint: "https://sourcegraph.com/.api/graphql".into(),
            web_search_endpoint: None,
            web_search_api_key_env: None,
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
        };
        write!(f, "{}: {}: {}", label, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, " ({h})")?;
        }
        Ok(())
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl KilnConfig {
    /// The profile named by `default_agent`.
    pub fn active_agent(&self) -> AgentConfig {
        self.agents
            .get(&self.default_agent)
            .cloned()
            .unwrap_or_default()
    }

    /// Validate the config and return a list of warnings.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Agents ───
        if !self.agents.contains_key(&self.default_agent) {
            warnings.push(ConfigWarning {
                field: "default_agent".into(),
                message: format!("no agent named '{}'", self.default_agent),
                severity: WarningSeverity::Error,
                hint: Some(format!(
                    "Defined agents: {}",
                    self.agents.keys().cloned().collect::<Vec<_>>().join(", ")
                )),
            });
        }
        for (name, agent) in &self.agents {
            if agent.model.is_empty() {
                warnings.push(ConfigWarning {
                    field: format!("agents.{name}.model"),
                    message: "model is empty".into(),
                    severity: WarningSeverity::Error,
                    hint: Some("Set to e.g. 'anthropic/claude-sonnet-4'".into()),
                });
            }
            if agent.max_tokens == 0 {
                warnings.push(ConfigWarning {
                    field: format!("agents.{name}.max_tokens"),
                    message: "max_tokens is 0, the agent won't produce output".into(),
                    severity: WarningSeverity::Warning,
                    hint: Some("Set to e.g. 8192".into()),
                });
            }
        }

        // ── Log level ───
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            warnings.push(ConfigWarning {
                field: "log_level".into(),
                message: format!("unknown log level '{}'", self.log_level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", LOG_LEVELS.join(", "))),
            });
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some("Use 'pretty' or 'json'".into()),
            });
        }

        // ── Language servers ───
        for (lang, lsp) in &self.lsp {
            if !lsp.disabled && lsp.command.is_empty() {
                warnings.push(ConfigWarning {
                    field: format!("lsp.{lang}.command"),
                    message: "command is empty".into(),
                    severity: WarningSeverity::Error,
                    hint: Some("Set the server binary or mark it disabled".into()),
                });
            }
        }

        // ── Providers ───
        for (name, p) in &self.providers {
            if !p.disabled && p.resolve_api_key().is_none() {
                warnings.push(ConfigWarning {
                    field: format!("providers.{name}"),
                    message: "no API key configured".into(),
                    severity: WarningSeverity::Warning,
                    hint: p
                        .api_key_env
                        .as_ref()
                        .map(|v| format!("Export {v} or set api_key")),
                });
            }
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
