//! Errors raised while loading a client configuration file

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse '{path}' (line {}, column {}): {message}",
            .line.unwrap_or(0), .column.unwrap_or(0))]
    ParseError {
        path: String,
        line: Option<usize>,
        column: Option<usize>,
        message: String,
    },

    #[error("invalid config value: {0}")]
    ValidationError(#[from] ValidationError),

    #[error("config references unset environment variable '{var}'")]
    EnvVarNotFound { var: String },

    #[error("unusable config: {message}")]
    Invalid { message: String },
}

/// A rejected value, located by its dotted path such as `chat.max_message_chars`
#[derive(Debug, Error)]
pub struct ValidationError {
    pub field_path: String,
    pub kind: ValidationErrorKind,
    /// Hint shown after the message
    pub context: Option<String>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field_path, self.kind)?;
        match &self.context {
            Some(hint) => write!(f, " ({})", hint),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ValidationErrorKind {
    #[error("value is required")]
    RequiredFieldMissing,

    #[error("out of range, {message}")]
    OutOfRange { message: String },

    #[error("conflicts with another setting, {message}")]
    Incompatible { message: String },

    #[error("bad URL, {message}")]
    InvalidUrl { message: String },

    #[error("unsupported version {actual}, expected {expected}")]
    InvalidVersion { expected: String, actual: String },
}

impl ValidationError {
    pub fn new(field_path: impl Into<String>, kind: ValidationErrorKind) -> Self {
        Self {
            field_path: field_path.into(),
            kind,
            context: None,
        }
    }

    pub fn with_context(mut self, hint: impl Into<String>) -> Self {
        self.context = Some(hint.into());
        self
    }

    pub fn required(field_path: impl Into<String>) -> Self {
        Self::new(field_path, ValidationErrorKind::RequiredFieldMissing)
    }

    pub fn out_of_range(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(field_path, ValidationErrorKind::OutOfRange { message })
    }

    pub fn incompatible(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(field_path, ValidationErrorKind::Incompatible { message })
    }

    pub fn invalid_url(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(field_path, ValidationErrorKind::InvalidUrl { message })
    }

    pub fn version_mismatch(expected: &str, actual: &str) -> Self {
        Self::new(
            "version",
            ValidationErrorKind::InvalidVersion {
                expected: expected.to_string(),
                actual: actual.to_string(),
            },
        )
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
