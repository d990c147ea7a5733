//! Environment variable interpolation for configuration

use super::error::ConfigError;
use super::secrets::SecretString;
use regex::Regex;
use std::env;
use std::sync::OnceLock;

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("env var pattern is a valid regex")
    })
}

/// Interpolate environment variables in a configuration string
pub fn interpolate_env_vars(content: &str) -> Result<String, ConfigError> {
    let mut result = content.to_string();

    for cap in env_var_pattern().captures_iter(content) {
        let full_match = &cap[0];
        let var_name = &cap[1];

        match env::var(var_name) {
            Ok(value) => {
                result = result.replace(full_match, &value);
            }
            Err(_) => {
                return Err(ConfigError::EnvVarNotFound {
                    var: var_name.to_string(),
                });
            }
        }
    }

    Ok(result)
}

/// Interpolate environment variables left in a loaded ClientConfig
pub fn interpolate_config_env_vars(
    config: &mut super::schema::ClientConfig,
) -> Result<(), ConfigError> {
    if let Some(token) = &config.server.token {
        let raw = token.expose_secret();
        if env_var_pattern().is_match(raw) {
            config.server.token = Some(SecretString::new(interpolate_single_value(raw)?));
        }
    }

    if env_var_pattern().is_match(&config.server.base_url) {
        config.server.base_url = interpolate_single_value(&config.server.base_url)?;
    }

    Ok(())
}

/// Interpolate a single value that may contain environment variables
fn interpolate_single_value(value: &str) -> Result<String, ConfigError> {
    if let Some(cap) = env_var_pattern().captures(value) {
        let var_name = &cap[1];
        match env::var(var_name) {
            Ok(env_value) => Ok(value.replace(&cap[0], &env_value)),
            Err(_) => Err(ConfigError::EnvVarNotFound {
                var: var_name.to_string(),
            }),
        }
    } else {
        Ok(value.to_string())
    }
}

/// Names of all `${VAR}` references in `text`
pub fn referenced_env_vars(text: &str) -> Vec<String> {
    env_var_pattern()
        .captures_iter(text)
        .map(|cap| cap[1].to_string())
        .collect()
}
