//! In-process cache for internal GET responses.
//!
//! # Design Decisions
//! - One entry per fingerprint; a later put replaces the earlier one
//! - Entries past their TTL are never returned, swept or not
//! - Concurrent misses on one fingerprint both run; no request coalescing

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use axum::http::{header, HeaderMap};
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::api::response::ApiResponse;
use crate::observability::metrics;

struct CacheEntry {
    response: ApiResponse,
    inserted: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted) <= self.ttl
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct ResponseCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<ApiResponse> {
        let found = {
            let entries = self.entries.read().expect("response cache lock poisoned");
            entries
                .get(key)
                .filter(|e| e.is_fresh(Instant::now()))
                .map(|e| e.response.clone())
        };
        match found {
            Some(response) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_api_cache(true);
                Some(response)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::record_api_cache(false);
                None
            }
        }
    }

    /// Store `response` if its headers allow caching. Returns the TTL used.
    pub fn put(&self, key: impl Into<String>, response: ApiResponse, headers: &HeaderMap) -> Option<Duration> {
        let ttl = ttl_for(headers, self.default_ttl, Utc::now())?;
        let entry = CacheEntry {
            response,
            inserted: Instant::now(),
            ttl,
        };
        self.entries
            .write()
            .expect("response cache lock poisoned")
            .insert(key.into(), entry);
        Some(ttl)
    }

    pub fn clear(&self) {
        self.entries.write().expect("response cache lock poisoned").clear();
    }

    /// Drop expired entries; returns how many went.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().expect("response cache lock poisoned");
        let before = entries.len();
        entries.retain(|_, e| e.is_fresh(now));
        before - entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.read().expect("response cache lock poisoned").len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub async fn run_sweeper(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.sweep();
                    if removed > 0 {
                        tracing::debug!(removed, "Swept expired API responses");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    }
}

/// How long a response may be cached, or `None` when it must not be.
///
/// `no-cache`/`no-store` and `max-age=0` forbid caching; `max-age=N` wins
/// over `Expires`; an `Expires` in the past forbids caching; otherwise
/// `default_ttl`.
pub fn ttl_for(headers: &HeaderMap, default_ttl: Duration, now: DateTime<Utc>) -> Option<Duration> {
    let cache_control = headers
        .get_all(header::CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|d| d.trim().to_ascii_lowercase())
        .collect::<Vec<_>>();

    if cache_control.iter().any(|d| d == "no-cache" || d == "no-store") {
        return None;
    }
    if let Some(secs) = cache_control
        .iter()
        .find_map(|d| d.strip_prefix("max-age=").and_then(|n| n.trim().parse::<u64>().ok()))
    {
        return (secs > 0).then(|| Duration::from_secs(secs));
    }

    if let Some(expires) = headers.get(header::EXPIRES).and_then(|v| v.to_str().ok()) {
        let remaining = DateTime::parse_from_rfc2822(expires)
            .ok()
            .map(|at| at.with_timezone(&Utc) - now)
            .and_then(|delta| delta.to_std().ok())
            .filter(|d| !d.is_zero());
        return remaining;
    }

    Some(default_ttl)
}

/// Cache key: `METHOD|path|name=value;...` over lowercase, sorted headers.
pub fn fingerprint(method: &str, path: &str, headers: &HeaderMap) -> String {
    let mut canonical: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            canonical.entry(name.as_str().to_ascii_lowercase()).or_default().push(value.trim());
        }
    }
    let mut key = format!("{}|{}|", method.to_ascii_uppercase(), path);
    for (name, mut values) in canonical {
        values.sort_unstable();
        key.push_str(&name);
        key.push('=');
        key.push_str(&values.join(","));
        key.push(';');
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn response() -> ApiResponse {
        ApiResponse {
            method: "GET".into(),
            path: "/health".into(),
            status: 200,
            headers: BTreeMap::new(),
            body: "ok".into(),
            data: None,
            parse_error: None,
            duration: Duration::from_millis(2),
            cache_hit: false,
        }
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn ttl_rules() {
        let default = Duration::from_secs(300);
        let now = Utc::now();
        assert_eq!(ttl_for(&HeaderMap::new(), default, now), Some(default));
        assert_eq!(ttl_for(&headers(&[("cache-control", "no-store")]), default, now), None);
        assert_eq!(ttl_for(&headers(&[("cache-control", "public, No-Cache")]), default, now), None);
        assert_eq!(ttl_for(&headers(&[("cache-control", "max-age=0")]), default, now), None);
        assert_eq!(
            ttl_for(&headers(&[("cache-control", "public, max-age=60")]), default, now),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn expires_header() {
        let default = Duration::from_secs(300);
        let now = DateTime::parse_from_rfc2822("Sun, 06 Nov 1994 08:49:37 GMT").unwrap().with_timezone(&Utc);
        let future = headers(&[("expires", "Sun, 06 Nov 1994 08:50:37 GMT")]);
        assert_eq!(ttl_for(&future, default, now), Some(Duration::from_secs(60)));
        let past = headers(&[("expires", "Sun, 06 Nov 1994 08:00:00 GMT")]);
        assert_eq!(ttl_for(&past, default, now), None);
    }

    #[test]
    fn put_then_get_counts_hits() {
        let cache = ResponseCache::new(Duration::from_secs(300));
        assert!(cache.get("k").is_none());
        assert!(cache.put("k", response(), &HeaderMap::new()).is_some());
        assert_eq!(cache.get("k").unwrap().body, "ok");
        assert_eq!(cache.stats(), CacheStats { entries: 1, hits: 1, misses: 1 });
        cache.clear();
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn uncacheable_responses_are_not_stored() {
        let cache = ResponseCache::new(Duration::from_secs(300));
        assert!(cache.put("k", response(), &headers(&[("cache-control", "no-cache")])).is_none());
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn stale_entries_are_never_returned() {
        let cache = ResponseCache::new(Duration::from_millis(1));
        cache.put("k", response(), &HeaderMap::new());
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get("k").is_none());
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn fingerprint_is_order_insensitive() {
        let a = headers(&[("accept", "text/html"), ("cookie", "s=1")]);
        let b = headers(&[("cookie", "s=1"), ("accept", "text/html")]);
        assert_eq!(fingerprint("get", "/x", &a), fingerprint("GET", "/x", &b));
        assert_ne!(fingerprint("GET", "/x", &a), fingerprint("GET", "/y", &a));
        assert_eq!(fingerprint("GET", "/x", &HeaderMap::new()), "GET|/x|");
    }
}
