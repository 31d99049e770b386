//! Site configuration (`sites/<host>/config.toml`).

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::render::Value;

#[derive(Debug, Error)]
pub enum TenantConfigError {
    #[error("failed to parse site config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required field `{0}`")]
    Missing(&'static str),

    #[error("invalid base_url {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TenantConfig {
    pub name: String,
    pub domain: String,
    pub base_url: String,
    pub active: bool,
    pub theme: String,
    pub description: String,
    /// Free-form settings exposed to templates as `.Site.Settings`.
    pub settings: toml::Table,
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            domain: String::new(),
            base_url: String::new(),
            active: true,
            theme: "default".to_string(),
            description: String::new(),
            settings: toml::Table::new(),
        }
    }
}

impl TenantConfig {
    pub fn parse(source: &str) -> Result<Self, TenantConfigError> {
        let config: TenantConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), TenantConfigError> {
        if self.name.trim().is_empty() {
            return Err(TenantConfigError::Missing("name"));
        }
        if self.domain.trim().is_empty() {
            return Err(TenantConfigError::Missing("domain"));
        }
        if self.base_url.trim().is_empty() {
            return Err(TenantConfigError::Missing("base_url"));
        }
        Url::parse(&self.base_url).map_err(|e| TenantConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    pub fn settings_value(&self) -> Value {
        serde_json::to_value(&self.settings)
            .map(Value::from)
            .unwrap_or_else(|_| Value::map())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let config = TenantConfig::parse(
            r#"
            name = "Acme"
            domain = "acme.com"
            base_url = "https://acme.com"
            theme = "dark"

            [settings]
            tagline = "We make things"
            per_page = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.name, "Acme");
        assert!(config.active);
        assert_eq!(config.theme, "dark");
        let settings = config.settings_value();
        assert_eq!(settings.get("per_page"), Some(&Value::Int(10)));
    }

    #[test]
    fn required_fields() {
        assert!(matches!(
            TenantConfig::parse("domain = \"a\"\nbase_url = \"https://a\""),
            Err(TenantConfigError::Missing("name"))
        ));
        assert!(matches!(
            TenantConfig::parse("name = \"a\"\ndomain = \"a\"\nbase_url = \"not a url\""),
            Err(TenantConfigError::InvalidBaseUrl { .. })
        ));
        assert!(matches!(TenantConfig::parse("name = "), Err(TenantConfigError::Parse(_))));
    }
}
