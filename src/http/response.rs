//! Response helpers shared by the handlers.
//!
//! # Responsibilities
//! - Plain-text error bodies (`text/plain; charset=utf-8`)
//! - Debug-info opt-in detection (`__include_debug_info__=true`)
//! - JSON bodies for the built-in endpoints

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode, Uri},
    response::Response,
};

pub const PLAIN_TEXT: &str = "text/plain; charset=utf-8";
pub const JSON: &str = "application/json";

/// Diagnostic message for callers that asked for debug info.
pub const X_DEBUG: HeaderName = HeaderName::from_static("x-debug");

/// Number of template errors hit while rendering the page.
pub const X_TEMPLATE_ERRORS: HeaderName = HeaderName::from_static("x-template-errors");

/// Query parameter and header name of the debug-info opt-in.
pub const DEBUG_FLAG: &str = "__include_debug_info__";

pub fn plain_text(status: StatusCode, body: impl Into<String>) -> Response {
    let mut response = Response::new(Body::from(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(PLAIN_TEXT));
    response
}

pub fn json(status: StatusCode, value: &serde_json::Value) -> Response {
    let mut response = Response::new(Body::from(value.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(JSON));
    response
}

/// True when the query or a header carries `__include_debug_info__=true`.
pub fn wants_debug(uri: &Uri, headers: &HeaderMap) -> bool {
    let header = headers
        .get(DEBUG_FLAG)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
    header
        || uri.query().is_some_and(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .any(|(k, v)| k == DEBUG_FLAG && v.eq_ignore_ascii_case("true"))
        })
}

/// Header-safe rendition of a diagnostic message.
pub fn header_value(message: &str) -> Option<HeaderValue> {
    let cleaned: String = message
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { ' ' })
        .take(1024)
        .collect();
    HeaderValue::from_str(&cleaned).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_from_query_or_header() {
        let empty = HeaderMap::new();
        let uri: Uri = "/x?__include_debug_info__=true".parse().unwrap();
        assert!(wants_debug(&uri, &empty));
        let uri: Uri = "/x?__include_debug_info__=false".parse().unwrap();
        assert!(!wants_debug(&uri, &empty));

        let mut headers = HeaderMap::new();
        headers.insert(DEBUG_FLAG, HeaderValue::from_static("TRUE"));
        assert!(wants_debug(&"/x".parse().unwrap(), &headers));
    }

    #[test]
    fn plain_text_sets_content_type() {
        let response = plain_text(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::CONTENT_TYPE], PLAIN_TEXT);
    }

    #[test]
    fn header_value_strips_control_characters() {
        let value = header_value("line one\nline two é").unwrap();
        assert_eq!(value.to_str().unwrap(), "line one line two  ");
    }
}
