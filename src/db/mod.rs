//! Per-site SQLite databases.
//!
//! Each site owns any number of logical databases stored as
//! `sites/<host>/databases/sqlite/<name>.db`, created on first use.

pub mod cache;

pub use cache::{DbCache, DbError, TenantDatabases};
