//! Config file loading and CLI overrides.

use std::path::Path;

use fluxpool_types::{AppConfig, ConfigError};
use validator::Validate;

use crate::cli::Cli;

/// Read `path` as JSON; no path means defaults.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(AppConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .map_err(|_| ConfigError::NotFound { path: path.display().to_string() })?;
    parse_config(&raw)
}

pub fn parse_config(raw: &str) -> Result<AppConfig, ConfigError> {
    serde_json::from_str(raw).map_err(|e| ConfigError::from_json_error(&e))
}

/// Arguments (and their env vars) win over the file.
pub fn apply_overrides(config: &mut AppConfig, cli: &Cli) {
    if let Some(url) = &cli.database_url {
        config.database_url.clone_from(url);
    }
    if let Some(url) = &cli.redis_url {
        config.redis_url.clone_from(url);
    }
    if let Some(bind) = &cli.bind {
        config.bind_address.clone_from(bind);
    }
}

pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    config.validate().map_err(|e| ConfigError::from_validation_errors(&e))?;
    if config.database_url.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "database_url".into(),
            message: "a PostgreSQL connection string is required".into(),
        });
    }
    if config.redis_url.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "redis_url".into(),
            message: "a Redis connection string is required".into(),
        });
    }
    Ok(())
}
