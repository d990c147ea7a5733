//! Secret handling for tokens, passwords and provider keys
//!
//! Secrets render as `[REDACTED]` in Display and Debug output so they can
//! flow through `tracing` fields and error messages safely. Serialization is
//! transparent: the backend needs the real value.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A wrapper type for sensitive strings like bearer tokens
#[derive(Clone, Deserialize, Serialize)]
#[serde(transparent)]
pub struct SecretString {
    value: String,
}

impl SecretString {
    /// Create a new secret string
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// Get the actual value (use with caution)
    pub fn expose_secret(&self) -> &str {
        &self.value
    }

    /// Check if the secret is empty
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Number of characters in the secret
    pub fn char_count(&self) -> usize {
        self.value.chars().count()
    }

    /// Get a partially redacted version for debugging
    pub fn partial_redact(&self) -> String {
        if self.value.is_empty() {
            return "[EMPTY]".to_string();
        }

        let chars: Vec<char> = self.value.chars().collect();
        let len = chars.len();
        if len <= 8 {
            "[REDACTED]".to_string()
        } else if self.value.starts_with("sk-") || self.value.starts_with("pk-") {
            let tail: String = chars[len - 4..].iter().collect();
            format!("{}...{}", &self.value[..3], tail)
        } else {
            let head: String = chars[..2].iter().collect();
            let tail: String = chars[len - 2..].iter().collect();
            format!("{}...{}", head, tail)
        }
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A trait for types that can be logged safely
pub trait SafeLogging {
    /// Returns a version with every secret redacted
    fn safe_for_logging(&self) -> String;
}
