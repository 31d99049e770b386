//! One log line and one metrics sample per request.

use std::time::Instant;

use axum::{
    body::Body,
    http::{header, Request},
    middleware::Next,
    response::Response,
};

use crate::api::InternalCall;
use crate::http::middleware::real_ip::ClientIp;
use crate::observability::metrics;

pub const X_REQUEST_ID: &str = "x-request-id";

pub async fn access_log_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let client = request
        .extensions()
        .get::<ClientIp>()
        .map(|ClientIp(ip)| ip.to_string())
        .unwrap_or_default();
    let internal = request.extensions().get::<InternalCall>().map(|c| c.depth);

    let response = next.run(request).await;
    let status = response.status().as_u16();
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

    match internal {
        Some(depth) => tracing::debug!(
            request_id = %request_id,
            method = %method,
            host = %host,
            path = %path,
            status,
            duration_ms,
            depth,
            "Internal request"
        ),
        None => {
            metrics::record_request(method.as_str(), status, start);
            tracing::info!(
                request_id = %request_id,
                method = %method,
                host = %host,
                path = %path,
                client = %client,
                status,
                duration_ms,
                "Request"
            );
        }
    }
    response
}
