//! In-process dispatcher for `api(...)` calls made by templates.
//!
//! # Data Flow
//! ```text
//! api("GET", "/api/pages")
//!     → validate (method, path, depth, cancellation)
//!     → forward selected headers + Host from the outer request, apply custom headers
//!     → GET only: fingerprint → cache hit? return
//!     → add X-Internal-API markers + InternalCall { depth }
//!     → app.oneshot(request) (bounded by the outer deadline)
//!     → buffer body → parse JSON → ApiResponse
//!     → GET with status < 400: cache per Cache-Control / Expires
//! ```
//!
//! # Design Decisions
//! - Non-2xx responses are results, not errors
//! - The depth marker is an extension, so clients cannot forge it with headers
//! - The application router is attached after it is built and detached on shutdown

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwapOption;
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, request::Parts, HeaderMap, HeaderName, HeaderValue, Method, Request},
    Router,
};
use chrono::Utc;
use thiserror::Error;
use tower::ServiceExt;

use crate::api::cache::{fingerprint, ResponseCache};
use crate::api::cancel::{CancelToken, Deadline};
use crate::api::response::ApiResponse;
use crate::http::middleware::real_ip::ClientIp;
use crate::render::Value;
use crate::security::Principal;

pub const X_INTERNAL_API: HeaderName = HeaderName::from_static("x-internal-api");
pub const X_INTERNAL_API_TIMESTAMP: HeaderName = HeaderName::from_static("x-internal-api-timestamp");

/// Headers copied from the outer request, besides every `Accept*`.
const FORWARDED_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "x-forwarded-for",
    "x-real-ip",
    "user-agent",
    "x-session-id",
    "x-site-domain",
];

const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid arguments: {0} is required")]
    InvalidArgs(&'static str),

    #[error("internal API dispatcher is not attached")]
    DispatcherUnavailable,

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("internal API nesting depth {depth} exceeds {max}")]
    DepthExceeded { depth: usize, max: usize },

    #[error("request cancelled")]
    Cancelled,

    #[error("request deadline exceeded")]
    Timeout,
}

/// Marks a request as dispatched in-process, `depth` levels deep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternalCall {
    pub depth: usize,
}

/// What an internal call inherits from the request that made it.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub host: Option<String>,
    pub headers: HeaderMap,
    pub peer: Option<SocketAddr>,
    pub client_ip: Option<ClientIp>,
    pub principal: Option<Principal>,
    pub depth: usize,
    pub deadline: Option<Deadline>,
    pub cancel: CancelToken,
}

impl CallContext {
    pub fn from_parts(parts: &Parts) -> Self {
        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| parts.uri.authority().map(|a| a.to_string()));
        Self {
            host,
            headers: parts.headers.clone(),
            peer: parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr),
            client_ip: parts.extensions.get::<ClientIp>().copied(),
            principal: parts.extensions.get::<Principal>().cloned(),
            depth: parts.extensions.get::<InternalCall>().map_or(0, |c| c.depth),
            deadline: parts.extensions.get::<Deadline>().copied(),
            cancel: parts.extensions.get::<CancelToken>().cloned().unwrap_or_default(),
        }
    }
}

pub struct InternalApi {
    router: ArcSwapOption<Router>,
    cache: Arc<ResponseCache>,
    max_depth: usize,
}

impl InternalApi {
    pub fn new(cache: Arc<ResponseCache>, max_depth: usize) -> Self {
        Self {
            router: ArcSwapOption::empty(),
            cache,
            max_depth,
        }
    }

    /// Route internal calls through `router`.
    pub fn attach(&self, router: Router) {
        self.router.store(Some(Arc::new(router)));
    }

    pub fn detach(&self) {
        self.router.store(None);
    }

    pub fn is_attached(&self) -> bool {
        self.router.load().is_some()
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub async fn call(
        &self,
        method: &str,
        path: &str,
        body: Option<String>,
        headers: &HeaderMap,
        original: &CallContext,
    ) -> Result<ApiResponse, ApiError> {
        let start = Instant::now();
        let method = method.trim();
        let path = path.trim();
        if method.is_empty() {
            return Err(ApiError::InvalidArgs("method"));
        }
        if path.is_empty() {
            return Err(ApiError::InvalidArgs("path"));
        }
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|e| ApiError::TransportError(e.to_string()))?;
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };

        if original.cancel.is_cancelled() {
            return Err(ApiError::Cancelled);
        }
        if original.deadline.is_some_and(|d| d.is_past()) {
            return Err(ApiError::Timeout);
        }
        let depth = original.depth + 1;
        if depth > self.max_depth {
            return Err(ApiError::DepthExceeded {
                depth,
                max: self.max_depth,
            });
        }

        let forwarded = forwarded_headers(original, headers)?;
        let cache_key = (method == Method::GET).then(|| fingerprint(method.as_str(), &path, &forwarded));
        if let Some(key) = &cache_key {
            if let Some(mut hit) = self.cache.get(key) {
                hit.cache_hit = true;
                hit.duration = start.elapsed();
                tracing::debug!(method = %method, path = %path, depth, "Internal API cache hit");
                return Ok(hit);
            }
        }

        let router = self.router.load_full().ok_or(ApiError::DispatcherUnavailable)?;
        let mut request = Request::builder()
            .method(method.clone())
            .uri(path.as_str())
            .body(Body::from(body.unwrap_or_default()))
            .map_err(|e| ApiError::TransportError(e.to_string()))?;
        *request.headers_mut() = forwarded;
        request
            .headers_mut()
            .insert(X_INTERNAL_API, HeaderValue::from_static("true"));
        let timestamp = HeaderValue::from_str(&Utc::now().to_rfc3339())
            .map_err(|e| ApiError::TransportError(e.to_string()))?;
        request.headers_mut().insert(X_INTERNAL_API_TIMESTAMP, timestamp);

        let extensions = request.extensions_mut();
        extensions.insert(InternalCall { depth });
        extensions.insert(original.cancel.clone());
        if let Some(peer) = original.peer {
            extensions.insert(ConnectInfo(peer));
        }
        if let Some(ip) = original.client_ip {
            extensions.insert(ip);
        }
        if let Some(principal) = &original.principal {
            extensions.insert(principal.clone());
        }
        if let Some(deadline) = original.deadline {
            extensions.insert(deadline);
        }

        let dispatched = Router::clone(&router).oneshot(request);
        let result = match original.deadline {
            Some(deadline) => tokio::time::timeout(deadline.remaining(), dispatched)
                .await
                .map_err(|_| ApiError::Timeout)?,
            None => dispatched.await,
        };
        let response = result.unwrap_or_else(|never| match never {});

        let (parts, body) = response.into_parts();
        let bytes = axum::body::to_bytes(body, MAX_RESPONSE_BYTES)
            .await
            .map_err(|e| ApiError::TransportError(e.to_string()))?;

        let is_json = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("json"));
        let (data, parse_error) = if is_json {
            match serde_json::from_slice::<serde_json::Value>(&bytes) {
                Ok(data) => (Some(data), None),
                Err(e) => (None, Some(e.to_string())),
            }
        } else {
            (None, None)
        };

        let response = ApiResponse {
            method: method.to_string(),
            path: path.clone(),
            status: parts.status.as_u16(),
            headers: header_map(&parts.headers),
            body: String::from_utf8_lossy(&bytes).into_owned(),
            data,
            parse_error,
            duration: start.elapsed(),
            cache_hit: false,
        };

        if let Some(key) = cache_key {
            if response.status < 400 {
                self.cache.put(key, response.clone(), &parts.headers);
            }
        }

        tracing::debug!(
            method = %method,
            path = %path,
            status = response.status,
            depth,
            duration_ms = response.duration.as_millis() as u64,
            "Internal API call"
        );
        Ok(response)
    }
}

fn forwarded_headers(original: &CallContext, custom: &HeaderMap) -> Result<HeaderMap, ApiError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &original.headers {
        let n = name.as_str();
        if FORWARDED_HEADERS.contains(&n) || n.starts_with("accept") {
            headers.append(name.clone(), value.clone());
        }
    }
    if let Some(host) = &original.host {
        let value = HeaderValue::from_str(host).map_err(|e| ApiError::TransportError(e.to_string()))?;
        headers.insert(header::HOST, value);
    }
    for name in custom.keys() {
        headers.remove(name);
    }
    for (name, value) in custom {
        headers.append(name.clone(), value.clone());
    }
    Ok(headers)
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            map.entry(name.as_str().to_string())
                .and_modify(|v: &mut String| {
                    v.push_str(", ");
                    v.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }
    }
    map
}

/// Body and headers from the `options` argument of `api(...)`.
///
/// `body` may be a string or any structured value (sent as JSON);
/// `headers` is a map of header names to values.
pub fn call_options(options: &Value) -> (Option<String>, HeaderMap) {
    let mut headers = HeaderMap::new();
    if let Some(Value::Map(custom)) = options.get("headers") {
        for (name, value) in custom {
            let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value.to_text()),
            ) else {
                continue;
            };
            headers.insert(name, value);
        }
    }

    let body = match options.get("body") {
        None | Some(Value::Null) => None,
        Some(Value::Str(s)) | Some(Value::Html(s)) => Some(s.clone()),
        Some(structured) => {
            if !headers.contains_key(header::CONTENT_TYPE) {
                headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
            Some(structured.to_json().to_string())
        }
    };
    (body, headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, response::IntoResponse, routing::get, Json};
    use std::time::Duration;

    fn api_with(router: Router) -> InternalApi {
        let api = InternalApi::new(Arc::new(ResponseCache::new(Duration::from_secs(300))), 4);
        api.attach(router);
        api
    }

    fn echo_router() -> Router {
        Router::new()
            .route(
                "/echo",
                get(|headers: HeaderMap| async move {
                    let seen = |n: &str| headers.get(n).and_then(|v| v.to_str().ok()).unwrap_or("").to_string();
                    Json(serde_json::json!({
                        "internal": seen("x-internal-api"),
                        "cookie": seen("cookie"),
                        "host": seen("host"),
                        "custom": seen("x-custom"),
                        "secret": seen("x-secret"),
                    }))
                }),
            )
            .route(
                "/broken",
                get(|| async { ([(header::CONTENT_TYPE, "application/json")], "{not json").into_response() }),
            )
            .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
            .route(
                "/nostore",
                get(|| async { ([(header::CACHE_CONTROL, "no-store")], "fresh").into_response() }),
            )
    }

    fn context() -> CallContext {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("session=1"));
        headers.insert("x-secret", HeaderValue::from_static("hidden"));
        headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en"));
        CallContext {
            host: Some("a.test".to_string()),
            headers,
            ..CallContext::default()
        }
    }

    #[tokio::test]
    async fn forwards_selected_headers_and_markers() {
        let api = api_with(echo_router());
        let mut custom = HeaderMap::new();
        custom.insert("x-custom", HeaderValue::from_static("yes"));
        custom.insert(header::COOKIE, HeaderValue::from_static("session=2"));

        let resp = api.call("get", "/echo", None, &custom, &context()).await.unwrap();
        assert_eq!(resp.status, 200);
        let data = resp.data.unwrap();
        assert_eq!(data["internal"], "true");
        assert_eq!(data["cookie"], "session=2");
        assert_eq!(data["host"], "a.test");
        assert_eq!(data["custom"], "yes");
        assert_eq!(data["secret"], "");
    }

    #[tokio::test]
    async fn second_get_is_served_from_cache() {
        let api = api_with(echo_router());
        let first = api.call("GET", "/echo", None, &HeaderMap::new(), &context()).await.unwrap();
        let second = api.call("GET", "/echo", None, &HeaderMap::new(), &context()).await.unwrap();
        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(first.body, second.body);
        assert_eq!(api.cache().stats().hits, 1);
    }

    #[tokio::test]
    async fn non_get_and_no_store_are_not_cached() {
        let api = api_with(echo_router());
        api.call("POST", "/echo", None, &HeaderMap::new(), &context()).await.unwrap();
        let again = api.call("POST", "/echo", None, &HeaderMap::new(), &context()).await.unwrap();
        assert!(!again.cache_hit);
        assert_eq!(again.status, 405);

        api.call("GET", "/nostore", None, &HeaderMap::new(), &context()).await.unwrap();
        let again = api.call("GET", "/nostore", None, &HeaderMap::new(), &context()).await.unwrap();
        assert!(!again.cache_hit);
    }

    #[tokio::test]
    async fn errors_and_non_success() {
        let api = api_with(echo_router());
        let ctx = context();
        assert!(matches!(api.call("", "/x", None, &HeaderMap::new(), &ctx).await, Err(ApiError::InvalidArgs("method"))));
        assert!(matches!(api.call("GET", " ", None, &HeaderMap::new(), &ctx).await, Err(ApiError::InvalidArgs("path"))));

        let missing = api.call("GET", "/missing", None, &HeaderMap::new(), &ctx).await.unwrap();
        assert_eq!(missing.status, 404);
        let again = api.call("GET", "/missing", None, &HeaderMap::new(), &ctx).await.unwrap();
        assert!(!again.cache_hit);

        let broken = api.call("GET", "/broken", None, &HeaderMap::new(), &ctx).await.unwrap();
        assert!(broken.data.is_none());
        assert!(broken.parse_error.is_some());
        assert_eq!(broken.body, "{not json");

        let deep = CallContext { depth: 4, ..context() };
        assert!(matches!(
            api.call("GET", "/echo", None, &HeaderMap::new(), &deep).await,
            Err(ApiError::DepthExceeded { depth: 5, max: 4 })
        ));

        let cancelled = context();
        cancelled.cancel.cancel();
        assert!(matches!(api.call("GET", "/echo", None, &HeaderMap::new(), &cancelled).await, Err(ApiError::Cancelled)));

        api.detach();
        assert!(matches!(
            api.call("GET", "/echo", None, &HeaderMap::new(), &ctx).await,
            Err(ApiError::DispatcherUnavailable)
        ));
    }

    #[test]
    fn options_body_and_headers() {
        let mut headers = Value::map();
        headers.insert("X-Token", "abc");
        let mut body = Value::map();
        body.insert("a", 1i64);
        let mut options = Value::map();
        options.insert("headers", headers);
        options.insert("body", body);

        let (body, headers) = call_options(&options);
        assert_eq!(body.as_deref(), Some(r#"{"a":1}"#));
        assert_eq!(headers["x-token"], "abc");
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(call_options(&Value::Null), (None, HeaderMap::new()));
    }
}
