//! Request middleware, outermost first: request id, real IP, panic
//! recovery, deadline, rate limit, access log.

pub mod access_log;
pub mod real_ip;

pub use access_log::{access_log_middleware, X_REQUEST_ID};
pub use real_ip::{real_ip_middleware, ClientIp};
