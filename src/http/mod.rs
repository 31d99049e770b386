//! HTTP front-ends.
//!
//! # Data Flow
//! ```text
//! HTTPS connection (SNI → tls::SniResolver)
//!     → server.rs (middleware stack)
//!     → site.rs (host → site → route → render)
//!     → response.rs (plain-text errors, debug headers)
//!
//! HTTP connection
//!     → redirect.rs (ACME HTTP-01 answers, 301 to HTTPS)
//! ```

pub mod middleware;
pub mod redirect;
pub mod response;
pub mod server;
pub mod site;

pub use redirect::redirect_app;
pub use server::{Server, ServerError};
pub use site::{site_handler, AppState};
