//! Configuration validation utilities

use super::error::ValidationError;
use super::schema::ClientConfig;
use regex::Regex;

/// Configuration validator with rules beyond the schema's own checks
pub struct ConfigValidator {
    /// Pattern for sensitive field names
    sensitive_pattern: Regex,
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigValidator {
    /// Create a new validator
    pub fn new() -> Self {
        Self {
            sensitive_pattern: Regex::new(r"(?i)(api_key|secret|token|password|credential)")
                .expect("sensitive field pattern is a valid regex"),
        }
    }

    /// Validate a configuration with extended rules
    pub fn validate(&self, config: &ClientConfig) -> Result<(), ValidationError> {
        config.validate()?;

        self.validate_model_selection(config)?;
        self.validate_plain_text_secrets(config)?;

        Ok(())
    }

    /// A default model only makes sense with a default provider
    fn validate_model_selection(&self, config: &ClientConfig) -> Result<(), ValidationError> {
        if config.chat.default_model.is_some() && config.chat.default_provider.is_none() {
            return Err(ValidationError::incompatible(
                "chat.default_model",
                "default_model requires default_provider",
            ));
        }
        Ok(())
    }

    /// Tokens must not leak into the base URL
    fn validate_plain_text_secrets(&self, config: &ClientConfig) -> Result<(), ValidationError> {
        if let Ok(url) = url::Url::parse(&config.server.base_url) {
            if url.password().is_some()
                || url
                    .query_pairs()
                    .any(|(key, _)| self.is_sensitive_field(&key))
            {
                return Err(ValidationError::invalid_url(
                    "server.base_url",
                    "credentials belong in server.token, not the URL",
                ));
            }
        }
        Ok(())
    }

    /// Check if a field name appears to contain sensitive information
    pub fn is_sensitive_field(&self, field_name: &str) -> bool {
        self.sensitive_pattern.is_match(field_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensitive_field_detection() {
        let validator = ConfigValidator::new();

        assert!(validator.is_sensitive_field("api_key"));
        assert!(validator.is_sensitive_field("ACCESS_TOKEN"));
        assert!(validator.is_sensitive_field("password"));

        assert!(!validator.is_sensitive_field("thread_id"));
        assert!(!validator.is_sensitive_field("model_name"));
    }

    #[test]
    fn test_token_in_query_rejected() {
        let mut config = ClientConfig::default();
        config.server.base_url = "https://chat.example.com/?token=abc".to_string();

        let err = ConfigValidator::new().validate(&config).unwrap_err();
        assert_eq!(err.field_path, "server.base_url");
    }

    #[test]
    fn test_model_without_provider_rejected() {
        let mut config = ClientConfig::default();
        config.chat.default_model = Some("gpt-4".to_string());

        let err = ConfigValidator::new().validate(&config).unwrap_err();
        assert_eq!(err.field_path, "chat.default_model");
    }
}
