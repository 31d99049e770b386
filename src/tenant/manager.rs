//! Tenant catalog.
//!
//! # Data Flow
//! ```text
//! get_tenant(host)
//!     → read lock: hit → return
//!     → write lock: re-check → config.toml → Tenant::new → catalog insert
//!     → unlock → Tenant::build (requests meanwhile see 425)
//! ```
//!
//! # Design Decisions
//! - Hosts without a `config.toml` are not cached; the next request looks again
//! - Building happens outside the write lock so other sites keep serving
//! - Eager loading logs per-site failures and carries on

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tokio::sync::RwLock;

use crate::config::TenantLogConfig;
use crate::db::{DbCache, TenantDatabases};
use crate::observability::metrics;
use crate::sandbox::{PathError, PathValidator};
use crate::tenant::config::TenantConfig;
use crate::tenant::logger::TenantLogger;
use crate::tenant::site::Tenant;
use crate::tenant::TenantError;
use crate::tls::AllowList;

pub const CONFIG_FILE: &str = "config.toml";

pub struct TenantManager {
    validator: Arc<PathValidator>,
    sites_dir: String,
    databases: Arc<DbCache>,
    allow: Arc<AllowList>,
    logging: TenantLogConfig,
    catalog: RwLock<HashMap<String, Arc<Tenant>>>,
}

impl TenantManager {
    pub fn new(
        validator: Arc<PathValidator>,
        sites_dir: impl Into<String>,
        databases: Arc<DbCache>,
        allow: Arc<AllowList>,
        logging: TenantLogConfig,
    ) -> Self {
        Self {
            validator,
            sites_dir: sites_dir.into(),
            databases,
            allow,
            logging,
            catalog: RwLock::new(HashMap::new()),
        }
    }

    pub fn validator(&self) -> &Arc<PathValidator> {
        &self.validator
    }

    pub fn databases(&self) -> &Arc<DbCache> {
        &self.databases
    }

    /// The site for `host`, loading it on first use. `Ok(None)` when no
    /// site directory exists for the host.
    pub async fn get_tenant(&self, host: &str) -> Result<Option<Arc<Tenant>>, TenantError> {
        if let Some(tenant) = self.catalog.read().await.get(host) {
            return Ok(Some(Arc::clone(tenant)));
        }
        if !is_valid_host(host) {
            return Err(TenantError::InvalidHost(host.to_string()));
        }

        let base_path = format!("{}/{}", self.sites_dir, host);
        let config_path = format!("{}/{}", base_path, CONFIG_FILE);
        if !self.validator.exists(&config_path).await {
            return Ok(None);
        }

        let tenant = {
            let mut catalog = self.catalog.write().await;
            if let Some(tenant) = catalog.get(host) {
                return Ok(Some(Arc::clone(tenant)));
            }

            let source = self.validator.read_to_string(&config_path).await?;
            let config = TenantConfig::parse(&source).map_err(|e| TenantError::Config {
                host: host.to_string(),
                source: e,
            })?;

            let databases = TenantDatabases::new(Arc::clone(&self.databases), host);
            let logger = if self.logging.persist {
                TenantLogger::persistent(host, self.logging.ring_capacity, databases.clone())
            } else {
                TenantLogger::new(host, self.logging.ring_capacity)
            };

            self.allow.insert(host);
            if !config.domain.is_empty() && !config.domain.eq_ignore_ascii_case(host) {
                self.allow.insert(&config.domain);
            }

            let tenant = Arc::new(Tenant::new(host, config, base_path, databases, Arc::new(logger)));
            catalog.insert(host.to_string(), Arc::clone(&tenant));
            metrics::set_tenants_loaded(catalog.len());
            tenant
        };

        match tenant.build(&self.validator).await {
            Ok(report) => {
                tracing::info!(
                    host = %host,
                    pages = report.pages,
                    skipped = report.skipped,
                    template_errors = report.template_errors,
                    "Site loaded"
                );
                Ok(Some(tenant))
            }
            Err(e) => {
                self.unload(host).await;
                Err(TenantError::Path(e))
            }
        }
    }

    /// Load every site under the sites directory, `concurrency` at a time.
    /// Returns the number of sites that loaded.
    pub async fn load_all(&self, concurrency: usize) -> Result<usize, TenantError> {
        let hosts = self.discover().await?;
        let loaded = stream::iter(hosts)
            .map(|host| async move {
                match self.get_tenant(&host).await {
                    Ok(Some(_)) => true,
                    Ok(None) => false,
                    Err(e) => {
                        tracing::error!(host = %host, error = %e, "Failed to load site");
                        false
                    }
                }
            })
            .buffer_unordered(concurrency.max(1))
            .filter(|ok| std::future::ready(*ok))
            .count()
            .await;
        Ok(loaded)
    }

    /// Directory names under the sites directory that carry a `config.toml`.
    async fn discover(&self) -> Result<Vec<String>, TenantError> {
        let dir = self.validator.resolve(&self.sites_dir)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(TenantError::Path(PathError::from_io(e))),
        };

        let mut hosts = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(PathError::from_io)? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !is_valid_host(&name) {
                continue;
            }
            let config = format!("{}/{}/{}", self.sites_dir, name, CONFIG_FILE);
            if self.validator.exists(&config).await {
                hosts.push(name);
            }
        }
        hosts.sort();
        Ok(hosts)
    }

    /// Drop a site from the catalog and the certificate allow-list.
    pub async fn unload(&self, host: &str) -> Option<Arc<Tenant>> {
        let mut catalog = self.catalog.write().await;
        let removed = catalog.remove(host);
        if let Some(tenant) = &removed {
            self.allow.remove(host);
            self.allow.remove(&tenant.config().domain);
        }
        metrics::set_tenants_loaded(catalog.len());
        removed
    }

    pub async fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.catalog.read().await.keys().cloned().collect();
        hosts.sort();
        hosts
    }

    pub async fn len(&self) -> usize {
        self.catalog.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.catalog.read().await.is_empty()
    }

    /// Flush every site logger.
    pub async fn close(&self) {
        let tenants: Vec<Arc<Tenant>> = self.catalog.read().await.values().cloned().collect();
        for tenant in tenants {
            tenant.logger().close().await;
        }
    }
}

/// Host names usable as a directory name below the sites directory.
pub fn is_valid_host(host: &str) -> bool {
    !host.is_empty()
        && host.len() <= 253
        && !host.starts_with('.')
        && !host.contains("..")
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;

    fn write(root: &std::path::Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn site(root: &std::path::Path, host: &str) {
        write(
            root,
            &format!("sites/{host}/config.toml"),
            &format!("name = \"{host}\"\ndomain = \"{host}\"\nbase_url = \"https://{host}\"\n"),
        );
        write(root, &format!("sites/{host}/layouts/default.html"), "{{template \"page-content\" .}}");
        write(root, &format!("sites/{host}/pages/index.html"), "home");
    }

    fn manager(root: &std::path::Path) -> (TenantManager, Arc<AllowList>) {
        let validator = Arc::new(PathValidator::new(root).unwrap());
        let cache = Arc::new(DbCache::new(Arc::clone(&validator), "sites", DatabaseConfig::default()));
        let allow = Arc::new(AllowList::new());
        let logging = TenantLogConfig {
            persist: false,
            ..TenantLogConfig::default()
        };
        (TenantManager::new(validator, "sites", cache, Arc::clone(&allow), logging), allow)
    }

    #[tokio::test]
    async fn loads_on_first_use_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        site(dir.path(), "a.test");
        let (manager, allow) = manager(dir.path());

        let first = manager.get_tenant("a.test").await.unwrap().unwrap();
        assert!(first.is_ready());
        let second = manager.get_tenant("a.test").await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(allow.contains("a.test"));
        assert!(manager.get_tenant("missing.test").await.unwrap().is_none());
        assert!(matches!(manager.get_tenant("../etc").await, Err(TenantError::InvalidHost(_))));
    }

    #[tokio::test]
    async fn load_all_skips_broken_sites() {
        let dir = tempfile::tempdir().unwrap();
        site(dir.path(), "a.test");
        site(dir.path(), "b.test");
        write(dir.path(), "sites/broken.test/config.toml", "name = \"x\"");
        std::fs::create_dir_all(dir.path().join("sites/empty.test")).unwrap();
        let (manager, _) = manager(dir.path());

        assert_eq!(manager.load_all(4).await.unwrap(), 2);
        assert_eq!(manager.hosts().await, vec!["a.test".to_string(), "b.test".to_string()]);
        assert_eq!(manager.len().await, 2);
    }

    #[tokio::test]
    async fn unload_clears_allow_list() {
        let dir = tempfile::tempdir().unwrap();
        site(dir.path(), "a.test");
        let (manager, allow) = manager(dir.path());
        manager.get_tenant("a.test").await.unwrap();
        assert!(manager.unload("a.test").await.is_some());
        assert!(!allow.contains("a.test"));
        assert!(manager.is_empty().await);
    }
}
