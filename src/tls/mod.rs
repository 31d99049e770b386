//! TLS certificate management.
//!
//! # Responsibilities
//! - Serve certificates per SNI name from memory or disk (`store`)
//! - Obtain missing certificates via ACME, HTTP-01 or TLS-ALPN-01 (`acme`)
//! - Answer pending challenges (`challenge`)
//! - Generate the development certificate (`self_signed`)
//!
//! # Modes
//! - development: one self-signed certificate for every name
//! - staging / production: ACME-issued certificates for allow-listed hosts

pub mod acme;
pub mod challenge;
pub mod pem;
pub mod self_signed;
pub mod store;

use thiserror::Error;

use crate::sandbox::PathError;

pub use acme::AcmeIssuer;
pub use challenge::{ChallengeStore, HTTP_CHALLENGE_PREFIX};
pub use store::{AllowList, CertStore, SniResolver};

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("domain {0:?} is not served here")]
    DomainNotAllowed(String),

    #[error("could not obtain certificate for {domain}: {reason}")]
    CertAcquireFailed { domain: String, reason: String },

    #[error("invalid certificate data: {0}")]
    Pem(String),

    #[error("acme: {0}")]
    Acme(#[from] instant_acme::Error),

    #[error("certificate generation: {0}")]
    Rcgen(#[from] rcgen::Error),

    #[error("rustls: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("certificate storage: {0}")]
    Path(#[from] PathError),
}

impl TlsError {
    pub fn acquire(domain: &str, reason: impl Into<String>) -> Self {
        TlsError::CertAcquireFailed {
            domain: domain.to_string(),
            reason: reason.into(),
        }
    }
}
