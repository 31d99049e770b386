//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! sitehost.toml
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! Tenant configuration (`<sites>/<host>/config.toml`) lives in
//! [`crate::tenant::config`].

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    CacheConfig, ChallengeKind, DatabaseConfig, Environment, ListenerConfig,
    ObservabilityConfig, RateLimitConfig, ServerConfig, TenantLogConfig, TimeoutConfig,
    TlsConfig,
};
