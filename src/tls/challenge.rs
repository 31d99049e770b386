//! Pending ACME challenges.
//!
//! HTTP-01 tokens are answered by the plain HTTP listener at
//! `/.well-known/acme-challenge/<token>`; TLS-ALPN-01 certificates are
//! handed out by the SNI resolver when a client offers `acme-tls/1`.

use std::sync::Arc;

use dashmap::DashMap;
use rustls::sign::CertifiedKey;

use crate::tls::self_signed;
use crate::tls::TlsError;

pub const HTTP_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";
pub const ACME_TLS_ALPN: &[u8] = b"acme-tls/1";

#[derive(Debug, Default)]
pub struct ChallengeStore {
    http: DashMap<String, String>,
    alpn: DashMap<String, Arc<CertifiedKey>>,
}

impl ChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_http(&self, token: impl Into<String>, key_authorization: impl Into<String>) {
        self.http.insert(token.into(), key_authorization.into());
    }

    /// Key authorization for `token`, if a challenge is pending.
    pub fn http_response(&self, token: &str) -> Option<String> {
        self.http.get(token).map(|v| v.value().clone())
    }

    pub fn remove_http(&self, token: &str) {
        self.http.remove(token);
    }

    pub fn put_alpn(&self, domain: &str, digest: &[u8]) -> Result<(), TlsError> {
        let cert = self_signed::alpn_challenge(domain, digest)?;
        self.alpn.insert(domain.to_ascii_lowercase(), cert);
        Ok(())
    }

    pub fn alpn_certificate(&self, domain: &str) -> Option<Arc<CertifiedKey>> {
        self.alpn.get(&domain.to_ascii_lowercase()).map(|v| Arc::clone(v.value()))
    }

    pub fn remove_alpn(&self, domain: &str) {
        self.alpn.remove(&domain.to_ascii_lowercase());
    }

    pub fn pending(&self) -> usize {
        self.http.len() + self.alpn.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_tokens() {
        let store = ChallengeStore::new();
        store.put_http("tok", "tok.thumb");
        assert_eq!(store.http_response("tok").as_deref(), Some("tok.thumb"));
        store.remove_http("tok");
        assert_eq!(store.http_response("tok"), None);
    }

    #[test]
    fn alpn_certificates_are_case_insensitive() {
        let store = ChallengeStore::new();
        store.put_alpn("Acme.com", &[1u8; 32]).unwrap();
        assert!(store.alpn_certificate("acme.COM").is_some());
        assert_eq!(store.pending(), 1);
        store.remove_alpn("acme.com");
        assert_eq!(store.pending(), 0);
    }
}
