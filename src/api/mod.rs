//! Internal API: HTTP-shaped calls from templates, served in-process.

pub mod cache;
pub mod cancel;
pub mod dispatcher;
pub mod response;

pub use cache::{fingerprint, ttl_for, CacheStats, ResponseCache};
pub use cancel::{CancelOnDrop, CancelToken, Deadline};
pub use dispatcher::{call_options, ApiError, CallContext, InternalApi, InternalCall};
pub use response::ApiResponse;
