//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Tenants additionally keep their own log ring (tenant::logger).
//! ```

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
