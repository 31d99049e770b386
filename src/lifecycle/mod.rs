//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → CLI overrides → Validate → Observability → Server
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain (grace period) → Close databases → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → graceful shutdown; second signal → immediate exit
//! ```

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
