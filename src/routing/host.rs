//! Host → site resolution.
//!
//! ```text
//! Host header
//!     → normalize_host: lowercase, strip port, unwrap `.localhost` (dev), strip `www.`
//!     → primary host → default host → not found
//!     → inactive (503) / not ready (425) / ready
//! ```

use std::sync::Arc;

use axum::{http::StatusCode, response::Response};

use crate::config::Environment;
use crate::error::SiteError;
use crate::http::response::plain_text;
use crate::tenant::{Tenant, TenantError, TenantManager};

const LOCALHOST_SUFFIX: &str = ".localhost";

pub struct HostRouter {
    tenants: Arc<TenantManager>,
    environment: Environment,
    default_host: Option<String>,
}

impl HostRouter {
    pub fn new(tenants: Arc<TenantManager>, environment: Environment, default_host: Option<String>) -> Self {
        Self {
            tenants,
            environment,
            default_host: default_host.map(|h| normalize_host(&h, false)),
        }
    }

    pub fn tenants(&self) -> &Arc<TenantManager> {
        &self.tenants
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// The ready site serving `raw_host`.
    pub async fn resolve(&self, raw_host: &str) -> Result<Arc<Tenant>, SiteError> {
        let host = normalize_host(raw_host, self.environment.is_development());
        let tenant = match self.lookup(&host).await? {
            Some(tenant) => tenant,
            None => match &self.default_host {
                Some(default) if *default != host => self
                    .lookup(default)
                    .await?
                    .ok_or_else(|| SiteError::TenantNotFound(host.clone()))?,
                _ => return Err(SiteError::TenantNotFound(host)),
            },
        };

        if !tenant.is_active() {
            return Err(SiteError::TenantInactive(tenant.host().to_string()));
        }
        if !tenant.is_ready() {
            return Err(SiteError::TenantNotReady(tenant.host().to_string()));
        }
        Ok(tenant)
    }

    async fn lookup(&self, host: &str) -> Result<Option<Arc<Tenant>>, SiteError> {
        match self.tenants.get_tenant(host).await {
            Ok(tenant) => Ok(tenant),
            Err(TenantError::InvalidHost(_)) => Ok(None),
            Err(e) => {
                tracing::error!(host = %host, error = %e, "Site failed to load");
                Err(SiteError::Internal(e.to_string()))
            }
        }
    }

    /// 404 for an unknown host. With `debug`, the body names the host that
    /// was tried and every registered domain.
    pub async fn not_found_response(&self, raw_host: &str, debug: bool) -> Response {
        if !debug {
            return plain_text(StatusCode::NOT_FOUND, "Not Found");
        }
        let host = normalize_host(raw_host, self.environment.is_development());
        let mut body = format!("No site is configured for host {:?}.\n", host);
        if let Some(default) = &self.default_host {
            body.push_str(&format!("Default host: {}\n", default));
        }
        let hosts = self.tenants.hosts().await;
        if hosts.is_empty() {
            body.push_str("No sites are registered.\n");
        } else {
            body.push_str("Registered domains:\n");
            for h in hosts {
                body.push_str(&format!("  - {}\n", h));
            }
        }
        plain_text(StatusCode::NOT_FOUND, body)
    }
}

/// Canonical site name for a `Host` header value.
///
/// In development `acme.com.localhost` becomes `acme.com`; a bare
/// `localhost` is left alone.
pub fn normalize_host(raw: &str, development: bool) -> String {
    let raw = raw.trim().trim_end_matches('.');
    let without_port = if let Some(rest) = raw.strip_prefix('[') {
        rest.split(']').next().unwrap_or(rest)
    } else {
        match raw.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => host,
            _ => raw,
        }
    };

    let mut host = without_port.to_ascii_lowercase();
    if development {
        if let Some(inner) = host.strip_suffix(LOCALHOST_SUFFIX) {
            if !inner.is_empty() {
                host = inner.to_string();
            }
        }
    }
    match host.strip_prefix("www.") {
        Some(bare) if !bare.is_empty() => bare.to_string(),
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_port_and_www() {
        assert_eq!(normalize_host("Example.COM:8443", false), "example.com");
        assert_eq!(normalize_host("www.example.com", false), "example.com");
        assert_eq!(normalize_host("[::1]:8443", false), "::1");
        assert_eq!(normalize_host("localhost", true), "localhost");
    }

    #[test]
    fn localhost_unwrap_only_in_development() {
        assert_eq!(normalize_host("acme.com.localhost:8443", true), "acme.com");
        assert_eq!(normalize_host("acme.com.localhost", false), "acme.com.localhost");
        assert_eq!(normalize_host("www.acme.com.localhost", true), "acme.com");
    }
}
