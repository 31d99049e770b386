//! Result of an internal API call.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::render::Value;

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub method: String,
    pub path: String,
    pub status: u16,
    /// Lowercase header names.
    pub headers: BTreeMap<String, String>,
    pub body: String,
    /// Parsed body when the response is JSON and parses.
    pub data: Option<serde_json::Value>,
    pub parse_error: Option<String>,
    pub duration: Duration,
    pub cache_hit: bool,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// The shape templates receive from `api(...)`.
    pub fn to_value(&self) -> Value {
        let mut v = Value::map();
        v.insert("status", self.status);
        v.insert(
            "data",
            self.data.clone().map(Value::from).unwrap_or(Value::Null),
        );
        v.insert("body", self.body.as_str());
        v.insert("headers", self.headers.clone());
        if let Some(e) = &self.parse_error {
            v.insert("_parse_error", e.as_str());
        }
        v.insert("_method", self.method.as_str());
        v.insert("_path", self.path.as_str());
        v.insert("_status", self.status);
        v.insert("_duration_ms", Value::Float(self.duration.as_secs_f64() * 1000.0));
        v.insert("_cache_hit", self.cache_hit);
        v
    }
}
