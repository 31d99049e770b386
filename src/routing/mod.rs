//! Request routing.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path)
//!     → host.rs (Host header → site)
//!     → router.rs (site's route table, ascending priority)
//!     → matcher.rs (anchored pattern match, parameter capture)
//!     → RouteMatch { page, params } or RouteNotFound
//! ```
//!
//! # Design Decisions
//! - Patterns compile to anchored regexes once, when a page is registered
//! - `/` scores 1000, literal segments 1, parameter segments 100; lower wins
//! - Equal priorities keep insertion order
//! - Tables are mutated under a per-site write lock; matching takes the read side

pub mod host;
pub mod matcher;
pub mod router;

pub use host::{normalize_host, HostRouter};
pub use matcher::{compile_pattern, priority_of, PatternMatcher, RouteError};
pub use router::{RouteEntry, RouteMatch, RouteTable, TenantRouter};
