//! Configuration loading from disk and environment.

use std::path::Path;
use std::fs;
use thiserror::Error;
use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
///
/// Environment overrides are applied after parsing and before validation.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: GatewayConfig = toml::from_str(&content)?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Build a configuration from defaults plus environment overrides.
pub fn load_from_env() -> Result<GatewayConfig, ConfigError> {
    let mut config = GatewayConfig::default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply the well-known environment variables on top of `config`.
///
/// `lookup` is injected so tests don't have to mutate the process environment.
pub fn apply_env_overrides<F>(config: &mut GatewayConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let set = |target: &mut String, key: &str| {
        if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
            *target = value;
        }
    };

    if let Some(port) = lookup("PORT").and_then(|p| p.parse::<u16>().ok()) {
        let host = config
            .listener
            .bind_address
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string());
        config.listener.bind_address = format!("{}:{}", host, port);
    }

    set(&mut config.upstream.url, "OLLAMA_API_URL");
    set(&mut config.upstream.api_key, "OLLAMA_API_KEY");
    set(&mut config.auth.user, "BASIC_AUTH_USER");
    set(&mut config.auth.pass, "BASIC_AUTH_PASS");
    set(&mut config.auth.app_token, "APP_TOKEN");
    set(&mut config.database.provider, "DB_PROVIDER");
    set(&mut config.database.url, "DB_URL");
    set(&mut config.database.api_key, "DB_API_KEY");
    set(&mut config.database.tenant, "DB_TENANT");
    set(&mut config.database.database, "DB_DATABASE");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn env_overrides_replace_file_values() {
        let env: HashMap<&str, &str> = [
            ("PORT", "18080"),
            ("APP_TOKEN", "secret-token"),
            ("OLLAMA_API_URL", "http://gpu-box:11434"),
            ("DB_PROVIDER", ""),
        ]
        .into_iter()
        .collect();

        let mut config = GatewayConfig::default();
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.listener.bind_address, "0.0.0.0:18080");
        assert_eq!(config.auth.app_token, "secret-token");
        assert_eq!(config.upstream.url, "http://gpu-box:11434");
        // Empty values are ignored
        assert_eq!(config.database.provider, "memory");
    }

    #[test]
    fn load_partial_toml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[auth]
user = "panda"
pass = "bamboo"
app_token = "t0k3n"

[websocket]
sweep_interval_secs = 5
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.auth.user, "panda");
        assert_eq!(config.websocket.sweep_interval_secs, 5);
        assert_eq!(config.websocket.chat_path, "/api/chat");
        assert_eq!(config.upstream.chat_timeout_secs, 120);
    }

    #[test]
    fn load_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[websocket]
chat_path = "/same"
status_path = "/same"
"#
        )
        .unwrap();

        match load_config(file.path()) {
            Err(ConfigError::Validation(errors)) => assert!(!errors.is_empty()),
            other => panic!("expected validation error, got {:?}", other),
        }
    }
}
