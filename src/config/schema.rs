//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the content server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener, filesystem and tenant discovery settings.
    pub server: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Per-tenant database pool settings.
    pub database: DatabaseConfig,

    /// Internal API response cache settings.
    pub cache: CacheConfig,

    /// Certificate management.
    pub tls: TlsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Per-tenant log store settings.
    pub logging: TenantLogConfig,
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Local,
    Staging,
    Production,
}

impl Environment {
    /// Development mode enables `.localhost` unwrapping, self-signed
    /// certificates and draft pages.
    pub fn is_development(self) -> bool {
        self == Environment::Local
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" | "dev" | "development" => Ok(Environment::Local),
            "staging" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

/// Listener and site discovery configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Interface to bind both listeners on.
    pub host: String,

    /// Plain HTTP port (redirects and ACME challenges).
    pub http_port: u16,

    /// HTTPS port (site traffic).
    pub https_port: u16,

    pub environment: Environment,

    /// Project root. All filesystem access is confined below it.
    pub project_root: PathBuf,

    /// Sites directory, relative to the project root.
    pub sites_dir: String,

    /// Tenant used when the request host has no site of its own.
    pub default_host: Option<String>,

    /// Load every tenant directory at startup instead of on first request.
    pub eager_load: bool,

    /// Parallelism for eager loading.
    pub load_concurrency: usize,

    /// Honor `X-Forwarded-For` / `X-Real-IP` when resolving the client address.
    pub trust_forwarded_headers: bool,

    /// Maximum nesting of internal API calls made from templates.
    pub max_api_depth: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
            https_port: 8443,
            environment: Environment::Local,
            project_root: PathBuf::from("."),
            sites_dir: "sites".to_string(),
            default_host: None,
            eager_load: true,
            load_concurrency: 8,
            trust_forwarded_headers: true,
            max_api_depth: 4,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request deadline in seconds.
    pub request_secs: u64,

    /// How long in-flight requests may drain during shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 120,
            shutdown_grace_secs: 10,
        }
    }
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Requests allowed per second per client.
    pub per_second: u32,

    /// Requests allowed per minute per client.
    pub per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            per_second: 20,
            per_minute: 600,
        }
    }
}

/// Database pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Maximum open connections per logical database.
    pub max_open: u32,

    /// Connections kept warm per logical database.
    pub max_idle: u32,

    /// Maximum lifetime of a pooled connection in seconds.
    pub max_lifetime_secs: u64,

    /// Idle connection timeout in seconds.
    pub idle_timeout_secs: u64,

    /// Cache entries unused for longer than this are closed.
    pub max_age_secs: u64,

    /// Sweep interval for idle eviction.
    pub sweep_interval_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_open: 10,
            max_idle: 2,
            max_lifetime_secs: 30 * 60,
            idle_timeout_secs: 5 * 60,
            max_age_secs: 60 * 60,
            sweep_interval_secs: 5 * 60,
        }
    }
}

/// Internal API response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL used when the response carries no caching headers.
    pub default_ttl_secs: u64,

    /// Interval of the expired-entry sweep.
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            sweep_interval_secs: 60,
        }
    }
}

/// ACME challenge type used for certificate orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
pub enum ChallengeKind {
    #[default]
    #[serde(rename = "http-01")]
    Http01,
    #[serde(rename = "tls-alpn-01")]
    TlsAlpn01,
}

/// Certificate management configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    /// ACME directory URL. Defaults to Let's Encrypt staging or production
    /// depending on the environment.
    pub acme_directory: Option<String>,

    /// Contact address registered with the ACME account.
    pub contact_email: Option<String>,

    /// Certificates directory, relative to the project root.
    pub certs_dir: String,

    pub challenge: ChallengeKind,

    /// Names covered by the development certificate.
    pub dev_names: Vec<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            acme_directory: None,
            contact_email: None,
            certs_dir: "certs".to_string(),
            challenge: ChallengeKind::Http01,
            dev_names: vec![
                "localhost".to_string(),
                "*.localhost".to_string(),
                "local.dev".to_string(),
                "*.local.dev".to_string(),
            ],
        }
    }
}

pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
pub const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

impl TlsConfig {
    /// Directory URL for the given environment.
    pub fn directory_url(&self, env: Environment) -> &str {
        match (&self.acme_directory, env) {
            (Some(url), _) => url,
            (None, Environment::Production) => LETS_ENCRYPT_PRODUCTION,
            (None, _) => LETS_ENCRYPT_STAGING,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Per-tenant log store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TenantLogConfig {
    /// Entries kept in memory and in the tenant's log database.
    pub ring_capacity: usize,

    /// Persist entries to the tenant's `logs` database.
    pub persist: bool,
}

impl Default for TenantLogConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 500,
            persist: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.https_port, 8443);
        assert_eq!(config.timeouts.request_secs, 120);
        assert_eq!(config.database.max_age_secs, 3600);
        assert_eq!(config.cache.default_ttl_secs, 300);
        assert_eq!(config.server.max_api_depth, 4);
    }

    #[test]
    fn parses_sections() {
        let config: ServerConfig = toml::from_str(
            r#"
            [server]
            environment = "production"
            https_port = 443
            default_host = "example.com"

            [tls]
            challenge = "tls-alpn-01"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.environment, Environment::Production);
        assert_eq!(config.server.https_port, 443);
        assert_eq!(config.server.default_host.as_deref(), Some("example.com"));
        assert_eq!(config.tls.challenge, ChallengeKind::TlsAlpn01);
        assert_eq!(
            config.tls.directory_url(config.server.environment),
            LETS_ENCRYPT_PRODUCTION
        );
    }

    #[test]
    fn environment_from_str() {
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Local);
        assert_eq!("Staging".parse::<Environment>().unwrap(), Environment::Staging);
        assert!("qa".parse::<Environment>().is_err());
    }
}
