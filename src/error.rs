//! Request-level errors and their HTTP surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::db::DbError;
use crate::routing::RouteError;
use crate::sandbox::PathError;

/// Everything that can end a site request early.
#[derive(Debug, Error)]
pub enum SiteError {
    #[error("no site for host {0}")]
    TenantNotFound(String),

    #[error("site {0} is inactive")]
    TenantInactive(String),

    #[error("site {0} is still initializing")]
    TenantNotReady(String),

    #[error("no route for {0}")]
    RouteNotFound(String),

    /// The validator refused a path. The attempted path is never echoed.
    #[error("path refused")]
    PathEscape,

    #[error("authentication required")]
    Unauthenticated,

    #[error("missing role {0}")]
    Forbidden(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Db(#[from] DbError),

    #[error("request timed out")]
    Timeout,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("internal error: {0}")]
    Internal(String),
}

impl SiteError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SiteError::TenantNotFound(_) | SiteError::RouteNotFound(_) | SiteError::PathEscape => {
                StatusCode::NOT_FOUND
            }
            SiteError::TenantInactive(_) => StatusCode::SERVICE_UNAVAILABLE,
            SiteError::TenantNotReady(_) => StatusCode::TOO_EARLY,
            SiteError::Unauthenticated => StatusCode::UNAUTHORIZED,
            SiteError::Forbidden(_) => StatusCode::FORBIDDEN,
            SiteError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            SiteError::Db(_) | SiteError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SiteError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            SiteError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// Plain-text response; with `debug`, the internal message travels in
    /// `X-Debug`.
    pub fn to_response(&self, debug: bool) -> Response {
        let status = self.status_code();
        let body = status.canonical_reason().unwrap_or("Error");
        let mut response = crate::http::response::plain_text(status, body);
        if debug {
            if let Some(value) = crate::http::response::header_value(&self.to_string()) {
                response.headers_mut().insert(crate::http::response::X_DEBUG, value);
            }
        }
        response
    }
}

impl From<PathError> for SiteError {
    fn from(e: PathError) -> Self {
        match e {
            PathError::Escape | PathError::NotFound => SiteError::PathEscape,
            PathError::Io(e) => SiteError::Internal(e.to_string()),
        }
    }
}

impl From<RouteError> for SiteError {
    fn from(e: RouteError) -> Self {
        match e {
            RouteError::NotFound { path } => SiteError::RouteNotFound(path),
            other => SiteError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for SiteError {
    fn into_response(self) -> Response {
        self.to_response(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(SiteError::TenantNotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(SiteError::TenantInactive("x".into()).status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(SiteError::TenantNotReady("x".into()).status_code().as_u16(), 425);
        assert_eq!(SiteError::Timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(SiteError::from(PathError::Escape).status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn debug_header_only_on_request() {
        let err = SiteError::RouteNotFound("/secret".into());
        let plain = err.to_response(false);
        assert!(plain.headers().get("x-debug").is_none());
        assert_eq!(plain.headers()["content-type"], "text/plain; charset=utf-8");
        let debug = err.to_response(true);
        assert_eq!(debug.headers()["x-debug"], "no route for /secret");
    }
}
