//! Configuration schema structures with serde support

use super::error::ValidationError;
use super::secrets::{SafeLogging, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Supported schema version
pub const CONFIG_VERSION: &str = "0.1";

/// Root configuration structure for the chat client
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Schema version (required - no default)
    pub version: String,

    /// Backend location and credentials
    #[serde(default)]
    pub server: ServerConfig,

    /// Connection and timeout settings
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Send path settings
    #[serde(default)]
    pub chat: ChatSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            server: ServerConfig::default(),
            connection: ConnectionConfig::default(),
            chat: ChatSettings::default(),
        }
    }
}

/// Backend server settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Base URL of the chat backend
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token (supports environment variable interpolation)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<SecretString>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
        }
    }
}

/// Connection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Time allowed until response headers arrive, in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Longest pause allowed between two stream reads, in milliseconds
    #[serde(default = "default_stream_idle_timeout")]
    pub stream_idle_timeout_ms: u64,

    /// Maximum idle connections per host
    #[serde(default = "default_max_idle")]
    pub max_idle_per_host: usize,

    /// Idle pooled connection lifetime in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            request_timeout_ms: default_request_timeout(),
            stream_idle_timeout_ms: default_stream_idle_timeout(),
            max_idle_per_host: default_max_idle(),
            keepalive_secs: default_keepalive(),
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_idle_timeout_ms)
    }
}

/// Send path settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChatSettings {
    /// Provider selected when a session starts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,

    /// Model selected when a session starts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// Request event-stream replies
    #[serde(default = "default_true")]
    pub stream: bool,

    /// Longest accepted message, in characters
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,

    /// Largest accepted attachment, in bytes
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            default_provider: None,
            default_model: None,
            stream: true,
            max_message_chars: default_max_message_chars(),
            max_attachment_bytes: default_max_attachment_bytes(),
        }
    }
}

// Default value functions for serde
fn default_true() -> bool { true }
fn default_base_url() -> String { "http://localhost:8000".to_string() }
fn default_connect_timeout() -> u64 { 10000 }
fn default_request_timeout() -> u64 { 30000 }
fn default_stream_idle_timeout() -> u64 { 60000 }
fn default_max_idle() -> usize { 10 }
fn default_keepalive() -> u64 { 90 }
fn default_max_message_chars() -> usize { 4000 }
fn default_max_attachment_bytes() -> usize { 10 * 1024 * 1024 }

impl ClientConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.version.is_empty() {
            return Err(ValidationError::required("version"));
        }

        if self.version != CONFIG_VERSION {
            return Err(ValidationError::version_mismatch(
                CONFIG_VERSION,
                &self.version,
            ));
        }

        self.server.validate("server")?;
        self.connection.validate("connection")?;
        self.chat.validate("chat")?;

        Ok(())
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        if self.base_url.is_empty() {
            return Err(ValidationError::required(format!("{}.base_url", path)));
        }

        match url::Url::parse(&self.base_url) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::invalid_url(
                        format!("{}.base_url", path),
                        format!("URL scheme must be http or https, got: {}", url.scheme()),
                    ));
                }
            }
            Err(e) => {
                return Err(ValidationError::invalid_url(
                    format!("{}.base_url", path),
                    e.to_string(),
                ));
            }
        }

        if let Some(token) = &self.token {
            if token.is_empty() {
                return Err(ValidationError::required(format!("{}.token", path))
                    .with_context("Omit the token instead of leaving it empty"));
            }
        }

        Ok(())
    }
}

impl ConnectionConfig {
    /// Validate connection configuration
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        for (field, value) in [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("request_timeout_ms", self.request_timeout_ms),
            ("stream_idle_timeout_ms", self.stream_idle_timeout_ms),
        ] {
            if value == 0 {
                return Err(ValidationError::out_of_range(
                    format!("{}.{}", path, field),
                    "Must be greater than 0",
                ));
            }
        }

        if self.stream_idle_timeout_ms < self.connect_timeout_ms {
            return Err(ValidationError::incompatible(
                format!("{}.stream_idle_timeout_ms", path),
                "must be at least connect_timeout_ms",
            ));
        }

        Ok(())
    }
}

impl ChatSettings {
    /// Validate chat settings
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        if self.max_message_chars == 0 {
            return Err(ValidationError::out_of_range(
                format!("{}.max_message_chars", path),
                "Must be greater than 0",
            ));
        }

        if self.max_attachment_bytes == 0 {
            return Err(ValidationError::out_of_range(
                format!("{}.max_attachment_bytes", path),
                "Must be greater than 0",
            ));
        }

        if matches!(&self.default_provider, Some(p) if p.trim().is_empty()) {
            return Err(ValidationError::required(format!("{}.default_provider", path))
                .with_context("Omit the provider instead of leaving it empty"));
        }

        Ok(())
    }
}

impl SafeLogging for ClientConfig {
    fn safe_for_logging(&self) -> String {
        format!(
            "base_url={} token={} request_timeout_ms={} stream_idle_timeout_ms={} provider={} model={}",
            self.server.base_url,
            self.server
                .token
                .as_ref()
                .map(|t| t.partial_redact())
                .unwrap_or_else(|| "[NONE]".to_string()),
            self.connection.request_timeout_ms,
            self.connection.stream_idle_timeout_ms,
            self.chat.default_provider.as_deref().unwrap_or("-"),
            self.chat.default_model.as_deref().unwrap_or("-"),
        )
    }
}
