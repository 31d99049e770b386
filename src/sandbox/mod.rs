//! Filesystem confinement.
//!
//! Every file the server touches on behalf of a request (pages, templates,
//! assets, databases, certificates) is addressed by a path relative to the
//! project root and resolved through [`PathValidator`]. A direct filesystem
//! path is never accepted from untrusted input.

pub mod serve;
pub mod validator;

pub use serve::serve_file;
pub use validator::{PathError, PathValidator};
