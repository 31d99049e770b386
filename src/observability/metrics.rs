//! Metrics collection and exposition.
//!
//! # Metrics
//! - `sitehost_requests_total` (counter): requests by method, status
//! - `sitehost_request_duration_seconds` (histogram): latency distribution
//! - `sitehost_rate_limited_total` (counter): rejections by window
//! - `sitehost_api_cache_total` (counter): internal API cache hits and misses
//! - `sitehost_db_connections` (gauge): open cached database pools
//! - `sitehost_tenants_loaded` (gauge): resident tenants
//! - `sitehost_template_errors_total` (counter): template errors while rendering
//!
//! The `metrics` facade is a no-op until [`init_metrics`] installs the
//! Prometheus exporter.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    let labels = [("method", method.to_string()), ("status", status.to_string())];
    metrics::counter!("sitehost_requests_total", &labels).increment(1);
    metrics::histogram!("sitehost_request_duration_seconds", &labels).record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(window: &'static str) {
    metrics::counter!("sitehost_rate_limited_total", "window" => window).increment(1);
}

pub fn record_api_cache(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    metrics::counter!("sitehost_api_cache_total", "result" => result).increment(1);
}

pub fn set_db_connections(count: usize) {
    metrics::gauge!("sitehost_db_connections").set(count as f64);
}

pub fn set_tenants_loaded(count: usize) {
    metrics::gauge!("sitehost_tenants_loaded").set(count as f64);
}
