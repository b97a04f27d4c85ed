#[cfg(test)]
mod tests {
    use kiln_config::ConfigLoader;
    use kiln_config::schema::*;
    use std::io::Write;
    use std::path::Path;

    // ── Default tests ──────────────────────────────────────────

    #[test]
    fn test_kiln_config_defaults() {
        let config = KilnConfig::default();
        assert_eq!(config.default_agent, "coder");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.data.directory, Path::new(".kiln"));
        assert!(config.agents.contains_key("coder"));
        assert!(config.agents.contains_key("task"));
        assert_eq!(config.shell.args, vec!["-l".to_string()]);
    }

    #[test]
    fn test_search_defaults() {
        let config = SearchConfig::default();
        assert_eq!(config.sourcegraph_endpoint, "https://sourcegraph.com/.api/graphql");
        assert!(config.web_search_endpoint.is_none());
    }

    #[test]
    fn test_defaults_validate_cleanly() {
        let warnings = KilnConfig::default().validate().unwrap();
        assert!(warnings.is_empty(), "{warnings:?}");
    }

    // ── YAML parsing ───────────────────────────────────────────

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
default_agent: coder
agents:
  coder:
    model: openai/gpt-4o
    max_tokens: 4096
log_level: debug
shell:
  path: /bin/zsh
lsp:
  rust:
    command: rust-analyzer
"#;
        let config = ConfigLoader::parse(yaml, Path::new("test.yaml")).unwrap();
        assert_eq!(config.active_agent().model, "openai/gpt-4o");
        assert_eq!(config.active_agent().max_tokens, 4096);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.shell.resolve_path(), "/bin/zsh");
        // Unspecified fields keep defaults.
        assert_eq!(config.shell.args, vec!["-l".to_string()]);
        assert_eq!(config.lsp["rust"].command, "rust-analyzer");
    }

    #[test]
    fn test_parse_empty_document() {
        let config = ConfigLoader::parse("   \n", Path::new("empty.yaml")).unwrap();
        assert_eq!(config.default_agent, "coder");
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = ConfigLoader::parse("agents: [1, 2", Path::new("broken.yaml")).unwrap_err();
        assert!(err.to_string().contains("broken.yaml"));
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = KilnConfig::default();
        let text = serde_yaml::to_string(&config).unwrap();
        let restored: KilnConfig = serde_yaml::from_str(&text).unwrap();
        assert_eq!(restored.default_agent, config.default_agent);
        assert_eq!(restored.agents.len(), config.agents.len());
    }

    // ── Validation ─────────────────────────────────────────────

    #[test]
    fn test_missing_default_agent_is_error() {
        let config = KilnConfig {
            default_agent: "ghost".into(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.contains("default_agent"));
    }

    #[test]
    fn test_empty_model_is_error() {
        let mut config = KilnConfig::default();
        config.agents.get_mut("coder").unwrap().model.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_log_level_is_warning() {
        let config = KilnConfig {
            log_level: "loud".into(),
            ..Default::default()
        };
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].severity, WarningSeverity::Warning);
        assert!(warnings[0].to_string().contains("log_level"));
    }

    #[test]
    fn test_lsp_without_command_is_error() {
        let mut config = KilnConfig::default();
        config.lsp.insert("go".into(), LspConfig::default());
        assert!(config.validate().is_err());
        config.lsp.get_mut("go").unwrap().disabled = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_provider_inline_key_wins() {
        let p = ProviderConfig {
            api_key: Some("sk-inline".into()),
            api_key_env: Some("KILN_TEST_UNSET_VAR_X".into()),
            disabled: false,
        };
        assert_eq!(p.resolve_api_key().as_deref(), Some("sk-inline"));
        let p = ProviderConfig {
            api_key: None,
            ..p
        };
        assert!(p.resolve_api_key().is_none());
    }

    // ── Loader ─────────────────────────────────────────────────

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiln.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "log_level: warn").unwrap();
        let loader = ConfigLoader::load(Some(&path)).unwrap();
        assert_eq!(loader.path(), path.as_path());
        // KILN_LOG_LEVEL may override in CI; only check the file parsed.
        assert!(!loader.get().agents.is_empty());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::load(Some(&dir.path().join("absent.yaml"))).unwrap();
        assert_eq!(loader.get().default_agent, "coder");
    }

    #[test]
    fn test_load_invalid_config_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiln.yaml");
        std::fs::write(&path, "default_agent: nobody\n").unwrap();
        assert!(ConfigLoader::load(Some(&path)).is_err());
    }

    #[test]
    fn test_reload_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiln.yaml");
        std::fs::write(&path, "default_agent: coder\n").unwrap();
        let loader = ConfigLoader::load(Some(&path)).unwrap();
        std::fs::write(&path, "default_agent: task\n").unwrap();
        loader.reload().unwrap();
        assert_eq!(loader.get().default_agent, "task");
    }
}
