//! Configuration module for the chat client
//!
//! This module provides the configuration schema, loading and validation for
//! the backend location, connection timeouts and send path limits.

mod env;
mod error;
mod schema;
mod secrets;
mod validator;

pub use env::referenced_env_vars;
pub use error::{ConfigError, ConfigResult, ValidationError, ValidationErrorKind};
pub use schema::{ChatSettings, ClientConfig, ConnectionConfig, ServerConfig, CONFIG_VERSION};
pub use secrets::{SafeLogging, SecretString};
pub use validator::ConfigValidator;

use std::fs;
use std::path::Path;

/// Load a configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> ConfigResult<ClientConfig> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.to_string_lossy().to_string(),
        source: e,
    })?;

    let interpolated = env::interpolate_env_vars(&content)?;

    let mut config: ClientConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::ParseError {
            path: path.to_string_lossy().to_string(),
            line: e.location().map(|l| l.line()),
            column: e.location().map(|l| l.column()),
            message: e.to_string(),
        })?;

    env::interpolate_config_env_vars(&mut config)?;

    ConfigValidator::new().validate(&config)?;
    Ok(config)
}

/// Load a configuration from a JSON file
pub fn load_from_json<P: AsRef<Path>>(path: P) -> ConfigResult<ClientConfig> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.to_string_lossy().to_string(),
        source: e,
    })?;

    let interpolated = env::interpolate_env_vars(&content)?;

    let mut config: ClientConfig =
        serde_json::from_str(&interpolated).map_err(|e| ConfigError::ParseError {
            path: path.to_string_lossy().to_string(),
            line: Some(e.line()),
            column: Some(e.column()),
            message: e.to_string(),
        })?;

    env::interpolate_config_env_vars(&mut config)?;

    ConfigValidator::new().validate(&config)?;
    Ok(config)
}

/// Load a configuration, picking the format from the file extension
pub fn load<P: AsRef<Path>>(path: P) -> ConfigResult<ClientConfig> {
    let path = path.as_ref();
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => load_from_json(path),
        Some("yaml") | Some("yml") => load_from_yaml(path),
        other => Err(ConfigError::Invalid {
            message: format!(
                "unsupported config extension '{}' for {}",
                other.unwrap_or(""),
                path.display()
            ),
        }),
    }
}
