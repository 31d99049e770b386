//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the shared subsystems (validator, databases, sites, dispatcher)
//! - Assemble the site application and its middleware stack
//! - Serve HTTPS (site traffic) and HTTP (ACME + redirect) side by side
//! - Drain both on shutdown, then close every database
//!
//! # Middleware (outermost first)
//! ```text
//! request id → real IP → panic recovery → deadline (504) → rate limit → access log → site_handler
//! ```

use std::any::Any;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    response::Response,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use thiserror::Error;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
};

use crate::api::{InternalApi, ResponseCache};
use crate::config::{ConfigError, ServerConfig};
use crate::db::DbCache;
use crate::http::middleware::{access_log_middleware, real_ip_middleware};
use crate::http::redirect::redirect_app;
use crate::http::response::plain_text;
use crate::http::site::{site_handler, AppState};
use crate::lifecycle::{signals, Shutdown};
use crate::routing::HostRouter;
use crate::sandbox::PathValidator;
use crate::security::{rate_limit_middleware, RateLimiterState};
use crate::tenant::{TenantError, TenantManager};
use crate::tls::{AcmeIssuer, AllowList, CertStore, ChallengeStore, TlsError};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("project root: {0}")]
    Root(std::io::Error),

    #[error("listener: {0}")]
    Io(#[from] std::io::Error),

    #[error("tls: {0}")]
    Tls(#[from] TlsError),

    #[error("sites: {0}")]
    Tenant(#[from] TenantError),
}

pub struct Server {
    config: Arc<ServerConfig>,
    validator: Arc<PathValidator>,
    databases: Arc<DbCache>,
    tenants: Arc<TenantManager>,
    hosts: Arc<HostRouter>,
    api: Arc<InternalApi>,
    limiter: Arc<RateLimiterState>,
    allow: Arc<AllowList>,
    challenges: Arc<ChallengeStore>,
    shutdown: Shutdown,
}

impl Server {
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let config = Arc::new(config);
        let validator =
            Arc::new(PathValidator::new(&config.server.project_root).map_err(ServerError::Root)?);
        let databases = Arc::new(DbCache::new(
            Arc::clone(&validator),
            config.server.sites_dir.clone(),
            config.database.clone(),
        ));
        let allow = Arc::new(AllowList::new());
        let tenants = Arc::new(TenantManager::new(
            Arc::clone(&validator),
            config.server.sites_dir.clone(),
            Arc::clone(&databases),
            Arc::clone(&allow),
            config.logging.clone(),
        ));
        let hosts = Arc::new(HostRouter::new(
            Arc::clone(&tenants),
            config.server.environment,
            config.server.default_host.clone(),
        ));
        let cache = Arc::new(ResponseCache::new(Duration::from_secs(config.cache.default_ttl_secs)));
        let api = Arc::new(InternalApi::new(cache, config.server.max_api_depth));
        let limiter = Arc::new(RateLimiterState::new(&config.rate_limit));

        Ok(Self {
            config,
            validator,
            databases,
            tenants,
            hosts,
            api,
            limiter,
            allow,
            challenges: Arc::new(ChallengeStore::new()),
            shutdown: Shutdown::new(),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn tenants(&self) -> &Arc<TenantManager> {
        &self.tenants
    }

    pub fn api(&self) -> &Arc<InternalApi> {
        &self.api
    }

    pub fn challenges(&self) -> &Arc<ChallengeStore> {
        &self.challenges
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// The site application with its middleware stack. The internal API
    /// dispatcher is attached to the returned router.
    pub fn build_app(&self) -> Router {
        let state = AppState {
            config: Arc::clone(&self.config),
            validator: Arc::clone(&self.validator),
            hosts: Arc::clone(&self.hosts),
            api: Arc::clone(&self.api),
        };

        let middleware = ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(from_fn_with_state(
                self.config.server.trust_forwarded_headers,
                real_ip_middleware,
            ))
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(TimeoutLayer::with_status_code(
                StatusCode::GATEWAY_TIMEOUT,
                self.config.timeouts.request(),
            ))
            .layer(from_fn_with_state(Arc::clone(&self.limiter), rate_limit_middleware))
            .layer(from_fn(access_log_middleware));

        let app = Router::new()
            .fallback(site_handler)
            .with_state(state)
            .layer(middleware);
        self.api.attach(app.clone());
        app
    }

    /// The plain-HTTP application.
    pub fn redirect_app(&self) -> Router {
        redirect_app(Arc::clone(&self.challenges), self.config.server.https_port)
    }

    async fn cert_store(&self) -> Result<Arc<CertStore>, ServerError> {
        let tls = &self.config.tls;
        let env = self.config.server.environment;
        let store = if env.is_development() {
            CertStore::development(
                Arc::clone(&self.validator),
                tls.certs_dir.clone(),
                &tls.dev_names,
                Arc::clone(&self.allow),
            )
            .await?
        } else {
            let issuer = Arc::new(AcmeIssuer::new(
                tls.directory_url(env),
                tls.contact_email.as_deref(),
                tls.challenge,
                Arc::clone(&self.challenges),
                Arc::clone(&self.validator),
                tls.certs_dir.clone(),
            ));
            CertStore::acme(
                Arc::clone(&self.validator),
                tls.certs_dir.clone(),
                issuer,
                Arc::clone(&self.challenges),
                Arc::clone(&self.allow),
            )
            .with_sites_dir(self.config.server.sites_dir.clone())
        };
        Ok(Arc::new(store))
    }

    /// Serve until SIGINT/SIGTERM, then drain and close.
    pub async fn run(self) -> Result<(), ServerError> {
        signals::install(self.shutdown.clone());

        tokio::spawn(Arc::clone(&self.databases).run_sweeper(self.shutdown.subscribe()));
        tokio::spawn(Arc::clone(self.api.cache()).run_sweeper(
            Duration::from_secs(self.config.cache.sweep_interval_secs),
            self.shutdown.subscribe(),
        ));
        tokio::spawn(Arc::clone(&self.limiter).run_pruner(self.shutdown.subscribe()));

        if self.config.server.eager_load {
            let loaded = self.tenants.load_all(self.config.server.load_concurrency).await?;
            tracing::info!(sites = loaded, "Sites loaded");
        }

        let certs = self.cert_store().await?;
        let tls = RustlsConfig::from_config(Arc::new(certs.rustls_config()?));

        let app = self.build_app();
        let redirect = self.redirect_app();

        let host = &self.config.server.host;
        let https_addr: SocketAddr = format!("{}:{}", host, self.config.server.https_port)
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let http_listener = TcpListener::bind((host.as_str(), self.config.server.http_port)).await?;

        tracing::info!(
            https = %https_addr,
            http = %http_listener.local_addr()?,
            environment = self.config.server.environment.as_str(),
            development_certificate = certs.is_development(),
            "Listening"
        );

        let handle = axum_server::Handle::new();
        let grace = Duration::from_secs(self.config.timeouts.shutdown_grace_secs);
        {
            let handle = handle.clone();
            let stop = self.shutdown.wait();
            tokio::spawn(async move {
                stop.await;
                handle.graceful_shutdown(Some(grace));
            });
        }

        let https = axum_server::bind_rustls(https_addr, tls)
            .handle(handle)
            .serve(app.into_make_service_with_connect_info::<SocketAddr>());
        let http = axum::serve(
            http_listener,
            redirect.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(self.shutdown.wait())
        .into_future();

        let result = tokio::try_join!(https, http);
        self.shutdown.trigger();

        self.api.detach();
        self.api.cache().clear();
        self.tenants.close().await;
        self.databases.close_all().await;
        tracing::info!("HTTP server stopped");

        result.map(|_| ()).map_err(ServerError::from)
    }
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let message = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = %message, "Handler panicked");
    plain_text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
}
