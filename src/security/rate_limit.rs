//! Per-client token-bucket rate limiting.
//!
//! Each client address owns two buckets: one refilled per second, one per
//! minute. A request needs a token from both. Internal API calls carry an
//! [`InternalCall`] extension and are never limited.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::api::InternalCall;
use crate::config::RateLimitConfig;
use crate::http::middleware::real_ip::ClientIp;
use crate::http::response::plain_text;
use crate::observability::metrics;

/// A simple token bucket rate limiter.
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_update: now,
        }
    }

    fn refill(&mut self, capacity: f64, refill_rate: f64, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;
    }
}

struct ClientBuckets {
    second: TokenBucket,
    minute: TokenBucket,
    last_seen: Instant,
}

/// Window that refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Second,
    Minute,
}

impl Window {
    pub fn as_str(self) -> &'static str {
        match self {
            Window::Second => "second",
            Window::Minute => "minute",
        }
    }
}

pub struct RateLimiterState {
    buckets: Mutex<HashMap<String, ClientBuckets>>,
    per_second: f64,
    per_minute: f64,
    enabled: bool,
}

impl RateLimiterState {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            per_second: config.per_second.max(1) as f64,
            per_minute: config.per_minute.max(1) as f64,
            enabled: config.enabled,
        }
    }

    pub fn check(&self, key: &str) -> Result<(), Window> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<(), Window> {
        let mut buckets = self.buckets.lock().expect("rate limiter mutex poisoned");
        let client = buckets.entry(key.to_string()).or_insert_with(|| ClientBuckets {
            second: TokenBucket::new(self.per_second, now),
            minute: TokenBucket::new(self.per_minute, now),
            last_seen: now,
        });
        client.last_seen = now;
        client.second.refill(self.per_second, self.per_second, now);
        client.minute.refill(self.per_minute, self.per_minute / 60.0, now);

        if client.second.tokens < 1.0 {
            return Err(Window::Second);
        }
        if client.minute.tokens < 1.0 {
            return Err(Window::Minute);
        }
        client.second.tokens -= 1.0;
        client.minute.tokens -= 1.0;
        Ok(())
    }

    /// Forget clients idle for longer than `idle`. Returns how many went.
    pub fn prune(&self, idle: Duration) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("rate limiter mutex poisoned");
        let before = buckets.len();
        buckets.retain(|_, c| now.saturating_duration_since(c.last_seen) <= idle);
        before - buckets.len()
    }

    pub fn clients(&self) -> usize {
        self.buckets.lock().expect("rate limiter mutex poisoned").len()
    }

    pub async fn run_pruner(self: Arc<Self>, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.prune(Duration::from_secs(120));
                    if removed > 0 {
                        tracing::debug!(removed, "Pruned idle rate limit buckets");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    }
}

pub async fn rate_limit_middleware(
    State(state): State<Arc<RateLimiterState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.enabled || request.extensions().get::<InternalCall>().is_some() {
        return next.run(request).await;
    }

    let key = request
        .extensions()
        .get::<ClientIp>()
        .map(|ClientIp(ip)| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    match state.check(&key) {
        Ok(()) => next.run(request).await,
        Err(window) => {
            tracing::warn!(client = %key, window = window.as_str(), "Rate limit exceeded");
            metrics::record_rate_limited(window.as_str());
            plain_text(StatusCode::TOO_MANY_REQUESTS, "Too Many Requests")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(per_second: u32, per_minute: u32) -> RateLimiterState {
        RateLimiterState::new(&RateLimitConfig {
            enabled: true,
            per_second,
            per_minute,
        })
    }

    #[test]
    fn per_second_budget_refills() {
        let state = limiter(2, 600);
        let t0 = Instant::now();
        assert!(state.check_at("a", t0).is_ok());
        assert!(state.check_at("a", t0).is_ok());
        assert_eq!(state.check_at("a", t0), Err(Window::Second));
        assert!(state.check_at("b", t0).is_ok());
        assert!(state.check_at("a", t0 + Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn per_minute_budget() {
        let state = limiter(100, 3);
        let t0 = Instant::now();
        for _ in 0..3 {
            assert!(state.check_at("a", t0).is_ok());
        }
        assert_eq!(state.check_at("a", t0 + Duration::from_millis(10)), Err(Window::Minute));
    }

    #[test]
    fn prune_drops_idle_clients() {
        let state = limiter(10, 100);
        state.check("a").unwrap();
        assert_eq!(state.clients(), 1);
        assert_eq!(state.prune(Duration::from_secs(60)), 0);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(state.prune(Duration::from_millis(1)), 1);
        assert_eq!(state.clients(), 0);
    }
}
