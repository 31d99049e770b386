//! Sites ("tenants") and their lifecycle.
//!
//! Each site lives in `sites/<host>/` with a `config.toml`, pages, templates,
//! assets and databases. The [`TenantManager`] owns the catalog; a
//! [`Tenant`] owns everything scoped to one site.

pub mod config;
pub mod logger;
pub mod manager;
pub mod site;

use thiserror::Error;

use crate::sandbox::PathError;

pub use config::{TenantConfig, TenantConfigError};
pub use logger::{LogEntry, LogLevel, TenantLogger};
pub use manager::TenantManager;
pub use site::{BuildReport, Tenant};

#[derive(Debug, Error)]
pub enum TenantError {
    #[error("invalid host {0:?}")]
    InvalidHost(String),

    #[error("site {host}: {source}")]
    Config {
        host: String,
        #[source]
        source: TenantConfigError,
    },

    #[error("site files: {0}")]
    Path(#[from] PathError),
}
