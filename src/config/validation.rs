//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and cross-field
//! constraints. All problems are reported, not just the first.

use std::fmt;

use crate::config::schema::ServerConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.http_port == config.server.https_port {
        errors.push(ValidationError::new(
            "server.https_port",
            "must differ from server.http_port",
        ));
    }
    if config.server.sites_dir.trim().is_empty() {
        errors.push(ValidationError::new("server.sites_dir", "must not be empty"));
    }
    if config.server.max_api_depth == 0 {
        errors.push(ValidationError::new("server.max_api_depth", "must be at least 1"));
    }
    if config.server.load_concurrency == 0 {
        errors.push(ValidationError::new(
            "server.load_concurrency",
            "must be at least 1",
        ));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }
    if config.rate_limit.enabled
        && (config.rate_limit.per_second == 0 || config.rate_limit.per_minute == 0)
    {
        errors.push(ValidationError::new(
            "rate_limit",
            "per_second and per_minute must be > 0 when enabled",
        ));
    }
    if config.database.max_open == 0 {
        errors.push(ValidationError::new("database.max_open", "must be > 0"));
    }
    if config.database.max_idle > config.database.max_open {
        errors.push(ValidationError::new(
            "database.max_idle",
            "must not exceed database.max_open",
        ));
    }
    if config.database.sweep_interval_secs == 0 {
        errors.push(ValidationError::new(
            "database.sweep_interval_secs",
            "must be > 0",
        ));
    }
    if config.cache.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("cache.sweep_interval_secs", "must be > 0"));
    }
    if let Some(url) = &config.tls.acme_directory {
        if url::Url::parse(url).is_err() {
            errors.push(ValidationError::new(
                "tls.acme_directory",
                format!("'{}' is not a valid URL", url),
            ));
        }
    }
    if !matches!(config.observability.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::new(
            "observability.log_format",
            "must be \"pretty\" or \"json\"",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ServerConfig::default()).is_ok());
    }

    #[test]
    fn rejects_bad_acme_url() {
        let mut config = ServerConfig::default();
        config.tls.acme_directory = Some("not a url".into());
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "tls.acme_directory");
    }
}
