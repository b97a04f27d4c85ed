use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use kiln_config::{ConfigLoader, KilnConfig};
use kiln_core::{KilnError, Result};
use kiln_runtime::{ToolRegistry, ToolServices, builtin_tools};

mod permissions;
mod run;

/// Exit status for a run stopped with Ctrl-C.
pub const EXIT_INTERRUPTED: u8 = 130;

/// Kiln: the tool execution core of a terminal coding assistant
#[derive(Parser)]
#[command(name = "kiln", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the YAML config file (default: ~/.kiln.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute tool calls: one JSON call per stdin line, one JSON result per stdout line
    Run {
        /// Session ID (a UUID); a new one is generated if omitted
        #[arg(short, long)]
        session: Option<String>,
        /// Working directory for the tools (default: config, then the current directory)
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Approve every permission request without asking
        #[arg(short, long)]
        yes: bool,
    },
    /// Print the schema of every tool as JSON
    Tools,
    /// Show the effective configuration
    Config {
        /// Output as JSON instead of YAML
        #[arg(long)]
        json: bool,
    },
}

/// Process exit status for a failed command.
pub fn exit_code(err: &KilnError) -> u8 {
    match err {
        KilnError::Cancelled => EXIT_INTERRUPTED,
        _ => 1,
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();
        self.init_tracing(&config);

        match self.command {
            Commands::Run { session, cwd, yes } => {
                let working_dir = resolve_working_dir(cwd, &config)?;
                run::cmd_run(config, working_dir, session, yes).await
            }
            Commands::Tools => Self::cmd_tools(&config),
            Commands::Config { json } => Self::cmd_config(&config, json),
        }
    }

    /// Level precedence: RUST_LOG, --log-level, --verbose/--quiet, config.
    /// Logs go to stderr; stdout carries tool results.
    fn init_tracing(&self, config: &KilnConfig) {
        let log_level = if let Some(level) = self.log_level.as_deref() {
            level
        } else if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            config.log_level.as_str()
        };
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

        if config.logging.format == "json" {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .json()
                .with_target(true)
                .init();
        } else {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
    }

    fn cmd_tools(config: &KilnConfig) -> Result<()> {
        let working_dir = resolve_working_dir(None, config)?;
        let services = Arc::new(ToolServices::from_config(config, working_dir)?);
        let registry = ToolRegistry::with_tools(builtin_tools(&services));
        let schemas: Vec<serde_json::Value> = registry
            .infos()
            .into_iter()
            .map(|info| {
                serde_json::json!({
                    "name": info.name,
                    "description": info.description,
                    "input_schema": info.input_schema(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&schemas)?);
        Ok(())
    }

    fn cmd_config(config: &KilnConfig, json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(config)?);
        } else {
            let yaml = serde_yaml::to_string(config)
                .map_err(|e| KilnError::Config(format!("cannot render config: {e}")))?;
            print!("{yaml}");
        }
        Ok(())
    }
}

/// `--cwd`, then the config's `working_dir`, then the process directory.
fn resolve_working_dir(cwd: Option<PathBuf>, config: &KilnConfig) -> Result<PathBuf> {
    let dir = match cwd.or_else(|| config.working_dir.clone()) {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    if !dir.is_dir() {
        return Err(KilnError::Config(format!(
            "working directory does not exist: {}",
            dir.display()
        )));
    }
    Ok(dir.canonicalize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_flags() {
        let cli = Cli::try_parse_from(["kiln", "run", "--yes", "--cwd", "/tmp", "-l", "debug"]).unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Commands::Run { session, cwd, yes } => {
                assert!(yes);
                assert_eq!(cwd, Some(PathBuf::from("/tmp")));
                assert!(session.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn exit_codes() {
        assert_eq!(exit_code(&KilnError::Cancelled), 130);
        assert_eq!(exit_code(&KilnError::Config("bad".into())), 1);
        assert_eq!(exit_code(&KilnError::PermissionDenied), 1);
    }

    #[test]
    fn working_dir_must_exist() {
        let config = KilnConfig::default();
        let err = resolve_working_dir(Some(PathBuf::from("/definitely/not/here")), &config).unwrap_err();
        assert!(matches!(err, KilnError::Config(_)));

        let dir = tempfile::tempdir().unwrap();
        let resolved = resolve_working_dir(Some(dir.path().to_path_buf()), &config).unwrap();
        assert_eq!(resolved, dir.path().canonicalize().unwrap());
    }
}
