//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → real client IP resolved (http::middleware::real_ip)
//!     → rate_limit.rs (per-client second and minute budgets)
//!     → site handler: page auth against the Principal extension
//! ```

pub mod principal;
pub mod rate_limit;

pub use principal::Principal;
pub use rate_limit::{rate_limit_middleware, RateLimiterState, Window};
