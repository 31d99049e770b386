//! Multi-tenant content server library.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod page;
pub mod render;
pub mod routing;
pub mod sandbox;
pub mod security;
pub mod tenant;
pub mod tls;

pub use config::schema::ServerConfig;
pub use error::SiteError;
pub use http::Server;
pub use lifecycle::Shutdown;
