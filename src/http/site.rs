//! Site request handling.
//!
//! # Data Flow
//! ```text
//! Request
//!     → HostRouter::resolve (404 / 503 / 425)
//!     → built-ins: /health, /api/site, /api/pages
//!     → /assets/*, /public/* → path-validated file serve
//!     → route match → draft / auth checks
//!     → render on the blocking pool (cancelled if this future is dropped)
//!     → text/html; X-Template-Errors; X-Debug on request
//! ```

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, request::Parts, HeaderValue, Method, Request, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use percent_encoding::percent_decode_str;
use tokio::runtime::Handle;

use crate::api::{call_options, CallContext, CancelOnDrop, CancelToken, Deadline, InternalApi};
use crate::config::ServerConfig;
use crate::error::SiteError;
use crate::http::response::{header_value, json, wants_debug, X_DEBUG, X_TEMPLATE_ERRORS};
use crate::page::Page;
use crate::render::helpers::api_error_value;
use crate::render::{HelperEnv, RenderContext, Value, HTML_CONTENT_TYPE};
use crate::routing::HostRouter;
use crate::sandbox::{serve_file, PathValidator};
use crate::security::Principal;
use crate::tenant::Tenant;

/// Shared state of the site application.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub validator: Arc<PathValidator>,
    pub hosts: Arc<HostRouter>,
    pub api: Arc<InternalApi>,
}

pub async fn site_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let debug = wants_debug(request.uri(), request.headers());
    let raw_host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|a| a.to_string()))
        .unwrap_or_default();

    let tenant = match state.hosts.resolve(&raw_host).await {
        Ok(tenant) => tenant,
        Err(SiteError::TenantNotFound(_)) => return state.hosts.not_found_response(&raw_host, debug).await,
        Err(e) => return e.to_response(debug),
    };

    match handle_site(&state, &tenant, request).await {
        Ok(response) => response,
        Err(e) => {
            if e.status_code().is_server_error() {
                tenant.logger().error("Request failed", &[("error", e.to_string().as_str())]);
            }
            e.to_response(debug)
        }
    }
}

async fn handle_site(state: &AppState, tenant: &Arc<Tenant>, request: Request<Body>) -> Result<Response, SiteError> {
    let path = percent_decode_str(request.uri().path())
        .decode_utf8()
        .map_err(|_| SiteError::InvalidInput("path is not valid UTF-8".to_string()))?
        .into_owned();
    let is_read = matches!(*request.method(), Method::GET | Method::HEAD);

    if is_read {
        match path.as_str() {
            "/health" => return Ok(health(tenant)),
            "/api/site" => return Ok(site_info(tenant)),
            "/api/pages" => return Ok(page_list(tenant, state.config.server.environment.is_development())),
            _ => {}
        }

        for (prefix, dir) in [("/assets/", "assets"), ("/public/", "public")] {
            if let Some(rest) = path.strip_prefix(prefix) {
                let rel = confined_path(rest).ok_or(SiteError::PathEscape)?;
                let file = format!("{}/{}/{}", tenant.base_path(), dir, rel);
                return Ok(serve_file(&state.validator, &file, request).await?);
            }
        }
    }

    let router = tenant
        .router()
        .ok_or_else(|| SiteError::TenantNotReady(tenant.host().to_string()))?;
    let renderer = tenant
        .renderer()
        .ok_or_else(|| SiteError::TenantNotReady(tenant.host().to_string()))?;
    // Parameters are decoded by the matcher, so match on the raw path.
    let matched = router.match_path(request.uri().path())?;
    let page = Arc::clone(&matched.page);

    if page.is_draft && !state.config.server.environment.is_development() {
        return Err(SiteError::RouteNotFound(path));
    }
    if page.require_auth {
        let principal = request
            .extensions()
            .get::<Principal>()
            .ok_or(SiteError::Unauthenticated)?;
        if let Some(role) = principal.missing_role(&page.required_roles) {
            return Err(SiteError::Forbidden(role.to_string()));
        }
    }

    let (mut parts, _body) = request.into_parts();
    let debug = wants_debug(&parts.uri, &parts.headers);

    let own_deadline = Deadline::after(state.config.timeouts.request());
    let deadline = parts
        .extensions
        .get::<Deadline>()
        .map_or(own_deadline, |inherited| inherited.min(own_deadline));
    let cancel = parts
        .extensions
        .get::<CancelToken>()
        .map_or_else(CancelToken::new, CancelToken::child);
    parts.extensions.insert(deadline);
    parts.extensions.insert(cancel.clone());

    let ctx = RenderContext {
        site: tenant.site_value(),
        request: request_value(&parts, &path),
        params: matched.params.clone(),
    };
    let env = SiteEnv {
        handle: Handle::current(),
        api: Arc::clone(&state.api),
        call: CallContext::from_parts(&parts),
        validator: Arc::clone(&state.validator),
        sites_dir: state.config.server.sites_dir.clone(),
    };

    let guard = CancelOnDrop::new(cancel);
    let render_page = Arc::clone(&page);
    let rendered = tokio::task::spawn_blocking(move || renderer.render(&render_page, ctx, &env)).await;
    guard.disarm();
    let output = rendered.map_err(|e| SiteError::Internal(format!("render task failed: {}", e)))?;

    if !output.errors.is_empty() {
        let first = output.errors[0].to_string();
        tenant.logger().warn("Template errors", &[
            ("page", page.slug.as_str()),
            ("path", path.as_str()),
            ("count", output.errors.len().to_string().as_str()),
            ("first", first.as_str()),
        ]);
    }

    let mut response = (StatusCode::OK, output.html).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(HTML_CONTENT_TYPE));
    if !output.errors.is_empty() {
        headers.insert(X_TEMPLATE_ERRORS, HeaderValue::from(output.errors.len()));
        if debug {
            let joined = output.errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
            if let Some(value) = header_value(&joined) {
                headers.insert(X_DEBUG, value);
            }
        }
    }
    Ok(response)
}

/// Path below an asset directory, or `None` if it tries to leave it.
fn confined_path(rest: &str) -> Option<String> {
    if rest.contains('\\') || rest.contains('\0') {
        return None;
    }
    let mut segments = Vec::new();
    for segment in rest.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

/// `.Request` as seen by templates.
fn request_value(parts: &Parts, path: &str) -> Value {
    let mut v = Value::map();
    v.insert("Method", parts.method.as_str());
    v.insert("Path", path);
    v.insert("RawQuery", parts.uri.query().unwrap_or(""));

    let mut query = Value::map();
    if let Some(q) = parts.uri.query() {
        for (k, val) in url::form_urlencoded::parse(q.as_bytes()) {
            query.insert(k.into_owned(), val.into_owned());
        }
    }
    v.insert("Query", query);

    let mut headers = Value::map();
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str(), value);
        }
    }
    v.insert("Headers", headers);
    v.insert(
        "Host",
        parts.headers.get(header::HOST).and_then(|h| h.to_str().ok()).unwrap_or(""),
    );
    v.insert(
        "RemoteAddr",
        parts
            .extensions
            .get::<crate::http::middleware::ClientIp>()
            .map(|ip| ip.0.to_string())
            .unwrap_or_default(),
    );
    v.insert("IsInternal", parts.extensions.get::<crate::api::InternalCall>().is_some());
    if let Some(principal) = parts.extensions.get::<Principal>() {
        let mut user = Value::map();
        user.insert("Subject", principal.subject.as_str());
        user.insert("Roles", principal.roles.clone());
        v.insert("User", user);
    }
    v
}

fn health(tenant: &Tenant) -> Response {
    let pages = tenant.router().map_or(0, |r| r.len());
    json(
        StatusCode::OK,
        &serde_json::json!({
            "status": "ok",
            "site": tenant.host(),
            "pages": pages,
            "time": Utc::now().to_rfc3339(),
        }),
    )
}

fn site_info(tenant: &Tenant) -> Response {
    let config = tenant.config();
    json(
        StatusCode::OK,
        &serde_json::json!({
            "name": config.name,
            "domain": config.domain,
            "host": tenant.host(),
            "base_url": config.base_url,
            "theme": config.theme,
            "description": config.description,
            "active": config.active,
            "settings": config.settings,
            "loaded_at": tenant.created_at().to_rfc3339(),
        }),
    )
}

fn page_list(tenant: &Tenant, include_drafts: bool) -> Response {
    let pages: Vec<Arc<Page>> = tenant
        .router()
        .map(|r| r.pages())
        .unwrap_or_default()
        .into_iter()
        .filter(|p| include_drafts || !p.is_draft)
        .collect();
    let listed: Vec<&Page> = pages.iter().map(|p| p.as_ref()).collect();
    json(StatusCode::OK, &serde_json::json!({ "pages": listed, "count": listed.len() }))
}

/// Helper environment of one render: file reads through the validator, API
/// calls through the dispatcher on the calling request's behalf.
struct SiteEnv {
    handle: Handle,
    api: Arc<InternalApi>,
    call: CallContext,
    validator: Arc<PathValidator>,
    sites_dir: String,
}

impl HelperEnv for SiteEnv {
    fn read_site_file(&self, tenant: &str, rel: &str) -> Result<String, String> {
        let path = format!("{}/{}/{}", self.sites_dir, tenant, rel);
        self.validator.read_to_string_blocking(&path).map_err(|e| e.to_string())
    }

    fn api_call(&self, method: &str, path: &str, options: &Value) -> Value {
        let (body, headers) = call_options(options);
        match self.handle.block_on(self.api.call(method, path, body, &headers, &self.call)) {
            Ok(response) => response.to_value(),
            Err(e) => api_error_value(method, path, &e.to_string()),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.call.cancel.is_cancelled() || self.call.deadline.is_some_and(|d| d.is_past())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confined_paths() {
        assert_eq!(confined_path("css/site.css").as_deref(), Some("css/site.css"));
        assert_eq!(confined_path("./a//b.js").as_deref(), Some("a/b.js"));
        assert_eq!(confined_path("../config.toml"), None);
        assert_eq!(confined_path("a/../../x"), None);
        assert_eq!(confined_path("a\\..\\x"), None);
        assert_eq!(confined_path(""), None);
    }
}
