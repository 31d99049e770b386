//! A loaded site and its resources.
//!
//! # Lifecycle
//! ```text
//! Tenant::new ──▶ catalog insert (not ready: 425)
//!      │
//!      ▼
//! Tenant::build: templates + pages ──▶ router/renderer published (ready)
//! ```

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};

use crate::db::TenantDatabases;
use crate::page::{fallback_page, parse_page};
use crate::render::{PageRenderer, TemplateSet, Value};
use crate::routing::TenantRouter;
use crate::sandbox::{PathError, PathValidator};
use crate::tenant::config::TenantConfig;
use crate::tenant::logger::TenantLogger;

pub struct Tenant {
    host: String,
    config: TenantConfig,
    base_path: String,
    created_at: DateTime<Utc>,
    router: ArcSwapOption<TenantRouter>,
    renderer: ArcSwapOption<PageRenderer>,
    databases: TenantDatabases,
    logger: Arc<TenantLogger>,
}

/// Outcome of [`Tenant::build`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BuildReport {
    pub pages: usize,
    pub skipped: usize,
    pub template_errors: usize,
}

impl Tenant {
    pub fn new(
        host: impl Into<String>,
        config: TenantConfig,
        base_path: impl Into<String>,
        databases: TenantDatabases,
        logger: Arc<TenantLogger>,
    ) -> Self {
        Self {
            host: host.into(),
            config,
            base_path: base_path.into(),
            created_at: Utc::now(),
            router: ArcSwapOption::empty(),
            renderer: ArcSwapOption::empty(),
            databases,
            logger,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn config(&self) -> &TenantConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.config.active
    }

    /// Root-relative site directory, e.g. `sites/acme.com`.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn databases(&self) -> &TenantDatabases {
        &self.databases
    }

    pub fn logger(&self) -> &Arc<TenantLogger> {
        &self.logger
    }

    /// The compiled router; `None` until [`Tenant::build`] has finished.
    pub fn router(&self) -> Option<Arc<TenantRouter>> {
        self.router.load_full()
    }

    pub fn renderer(&self) -> Option<Arc<PageRenderer>> {
        self.renderer.load_full()
    }

    pub fn is_ready(&self) -> bool {
        self.router.load().is_some()
    }

    /// Load templates and pages, then publish router and renderer.
    ///
    /// Pages with bad metadata fall back to body-only pages; pages whose
    /// route fails to compile or collides are logged and skipped.
    pub async fn build(&self, validator: &PathValidator) -> Result<BuildReport, PathError> {
        let set = TemplateSet::load(validator, &self.base_path, &self.config.theme).await?;
        let mut report = BuildReport {
            template_errors: set.errors().len(),
            ..BuildReport::default()
        };
        for error in set.errors() {
            self.logger.warn("Template parse error", &[("error", error.to_string().as_str())]);
        }

        let router = TenantRouter::new();
        let pages_dir = format!("{}/pages", self.base_path);
        for file in validator.walk(&pages_dir).await? {
            let Some(slug) = file
                .strip_prefix(&pages_dir)
                .and_then(|rest| rest.strip_prefix('/'))
                .and_then(|rest| rest.strip_suffix(".html"))
            else {
                continue;
            };

            let source = validator.read_to_string(&file).await?;
            let mut page = match parse_page(slug, &source) {
                Ok(page) => page,
                Err(e) => {
                    self.logger.warn("Page metadata invalid, using body only", &[
                        ("page", slug),
                        ("error", e.to_string().as_str()),
                    ]);
                    fallback_page(slug, &source)
                }
            };
            if let Ok(meta) = validator.stat(&file).await {
                page.updated_at = meta.modified().ok().map(DateTime::<Utc>::from);
                page.created_at = meta.created().ok().map(DateTime::<Utc>::from).or(page.updated_at);
            }

            match router.add(Arc::new(page)) {
                Ok(()) => report.pages += 1,
                Err(e) => {
                    report.skipped += 1;
                    self.logger.error("Route rejected", &[("page", slug), ("error", e.to_string().as_str())]);
                }
            }
        }

        self.renderer.store(Some(Arc::new(PageRenderer::new(Arc::new(set)))));
        self.router.store(Some(Arc::new(router)));
        self.logger.info("Site ready", &[
            ("pages", report.pages.to_string().as_str()),
            ("skipped", report.skipped.to_string().as_str()),
        ]);
        Ok(report)
    }

    /// `.Site` as seen by templates.
    pub fn site_value(&self) -> Value {
        let mut v = Value::map();
        v.insert("Name", self.config.name.as_str());
        v.insert("Domain", self.config.domain.as_str());
        v.insert("Host", self.host.as_str());
        v.insert("BaseURL", self.config.base_url.as_str());
        v.insert("Theme", self.config.theme.as_str());
        v.insert("Description", self.config.description.as_str());
        v.insert("Active", self.config.active);
        v.insert("Settings", self.config.settings_value());
        v
    }
}
