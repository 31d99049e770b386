//! Plain-HTTP listener: ACME HTTP-01 answers, everything else to HTTPS.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue, Request, StatusCode},
    response::Response,
    routing::get,
    Router,
};

use crate::http::response::plain_text;
use crate::routing::normalize_host;
use crate::tls::ChallengeStore;

#[derive(Clone)]
struct RedirectState {
    challenges: Arc<ChallengeStore>,
    https_port: u16,
}

pub fn redirect_app(challenges: Arc<ChallengeStore>, https_port: u16) -> Router {
    Router::new()
        .route("/.well-known/acme-challenge/{token}", get(acme_challenge))
        .fallback(redirect_to_https)
        .with_state(RedirectState { challenges, https_port })
}

async fn acme_challenge(State(state): State<RedirectState>, Path(token): Path<String>) -> Response {
    match state.challenges.http_response(&token) {
        Some(key_authorization) => {
            tracing::info!(token = %token, "Answered HTTP-01 challenge");
            plain_text(StatusCode::OK, key_authorization)
        }
        None => {
            tracing::warn!(token = %token, "Unknown HTTP-01 challenge token");
            plain_text(StatusCode::NOT_FOUND, "Not Found")
        }
    }
}

async fn redirect_to_https(State(state): State<RedirectState>, request: Request<Body>) -> Response {
    let Some(host) = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(normalize_host_keep_www)
        .filter(|h| !h.is_empty())
    else {
        return plain_text(StatusCode::BAD_REQUEST, "Bad Request");
    };

    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let location = if state.https_port == 443 {
        format!("https://{}{}", host, path)
    } else {
        format!("https://{}:{}{}", host, state.https_port, path)
    };

    match HeaderValue::from_str(&location) {
        Ok(value) => {
            let mut response = plain_text(StatusCode::MOVED_PERMANENTLY, "Moved Permanently");
            response.headers_mut().insert(header::LOCATION, value);
            response
        }
        Err(_) => plain_text(StatusCode::BAD_REQUEST, "Bad Request"),
    }
}

/// Host without port, as the client typed it otherwise.
fn normalize_host_keep_www(raw: &str) -> String {
    let bare = normalize_host(raw, false);
    let lowered = raw.to_ascii_lowercase();
    let typed_www = lowered.starts_with("www.") && !bare.starts_with("www.");
    let host = if typed_www { format!("www.{}", bare) } else { bare };
    if host.contains(':') {
        format!("[{}]", host)
    } else {
        host
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_www_and_brackets_ipv6() {
        assert_eq!(normalize_host_keep_www("WWW.Acme.com:8080"), "www.acme.com");
        assert_eq!(normalize_host_keep_www("acme.com"), "acme.com");
        assert_eq!(normalize_host_keep_www("[::1]:80"), "[::1]");
    }
}
