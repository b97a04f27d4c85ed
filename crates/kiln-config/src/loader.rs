use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::schema::KilnConfig;

/// Loads the Kiln configuration and keeps a shared snapshot.
pub struct ConfigLoader {
    config: Arc<RwLock<KilnConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > KILN_CONFIG env > ~/.kiln.yaml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("KILN_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".kiln.yaml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> kiln_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            Self::parse(&raw, &config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            KilnConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => {
                return Err(kiln_core::KilnError::Config(e));
            }
        }

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Parse YAML text. An empty document yields the defaults.
    pub fn parse(raw: &str, origin: &Path) -> kiln_core::Result<KilnConfig> {
        if raw.trim().is_empty() {
            return Ok(KilnConfig::default());
        }
        serde_yaml::from_str::<KilnConfig>(raw).map_err(|e| {
            kiln_core::KilnError::Config(format!("failed to parse {}: {}", origin.display(), e))
        })
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> KilnConfig {
        self.config.read().clone()
    }

    /// Get a shared reference for subscription.
    pub fn shared(&self) -> Arc<RwLock<KilnConfig>> {
        Arc::clone(&self.config)
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Apply env var overrides (KILN_MODEL, KILN_LOG_LEVEL, ...).
    pub fn apply_env_overrides(mut config: KilnConfig) -> KilnConfig {
        if let Ok(v) = std::env::var("KILN_MODEL") {
            let name = config.default_agent.clone();
            config.agents.entry(name).or_default().model = v;
        }
        if let Ok(v) = std::env::var("KILN_LOG_LEVEL") {
            config.log_level = v;
        }
        if let Ok(v) = std::env::var("KILN_DATA_DIR") {
            config.data.directory = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("KILN_SHELL") {
            config.shell.path = Some(v);
        }
        config
    }

    /// Re-read the file, keeping the current config if it fails to parse.
    pub fn reload(&self) -> kiln_core::Result<()> {
        if !self.config_path.exists() {
            return Err(kiln_core::KilnError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let raw = std::fs::read_to_string(&self.config_path)?;
        let new_config = Self::apply_env_overrides(Self::parse(&raw, &self.config_path)?);
        new_config.validate().map_err(kiln_core::KilnError::Config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }
}
