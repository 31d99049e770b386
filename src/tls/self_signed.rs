//! Locally generated certificates: the development certificate and the
//! TLS-ALPN-01 challenge certificate.

use std::sync::Arc;

use rcgen::{CertificateParams, CustomExtension, DistinguishedName, DnType, KeyPair};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::sign::CertifiedKey;

use crate::tls::pem::certified_key_der;
use crate::tls::TlsError;

/// Addresses always covered by the development certificate.
pub const LOOPBACK_NAMES: &[&str] = &["127.0.0.1", "::1"];

/// A freshly generated chain and key, PEM encoded.
#[derive(Debug, Clone)]
pub struct PemPair {
    pub chain_pem: String,
    pub key_pem: String,
}

/// Self-signed ECDSA P-256 certificate for `names`. Names that parse as IP
/// addresses become IP SANs.
pub fn generate(names: &[String]) -> Result<PemPair, TlsError> {
    let mut params = CertificateParams::new(names.to_vec())?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, names.first().map(String::as_str).unwrap_or("localhost"));
    dn.push(DnType::OrganizationName, "sitehost development");
    params.distinguished_name = dn;

    let key = KeyPair::generate()?;
    let cert = params.self_signed(&key)?;
    Ok(PemPair {
        chain_pem: cert.pem(),
        key_pem: key.serialize_pem(),
    })
}

/// Development names plus the loopback addresses, deduplicated.
pub fn development_names(configured: &[String]) -> Vec<String> {
    let mut names: Vec<String> = configured.to_vec();
    for ip in LOOPBACK_NAMES {
        if !names.iter().any(|n| n == ip) {
            names.push(ip.to_string());
        }
    }
    names
}

/// Certificate answering a TLS-ALPN-01 challenge for `domain`, carrying the
/// SHA-256 digest of the key authorization in the acmeIdentifier extension.
pub fn alpn_challenge(domain: &str, digest: &[u8]) -> Result<Arc<CertifiedKey>, TlsError> {
    let mut params = CertificateParams::new(vec![domain.to_string()])?;
    params.custom_extensions = vec![CustomExtension::new_acme_identifier(digest)];
    let key = KeyPair::generate()?;
    let cert = params.self_signed(&key)?;
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der()));
    certified_key_der(vec![cert.der().clone()], key_der)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::pem::certified_key;

    #[test]
    fn development_certificate_covers_loopback() {
        let names = development_names(&["localhost".to_string(), "*.localhost".to_string()]);
        assert_eq!(names.len(), 4);
        let pair = generate(&names).unwrap();
        assert!(pair.chain_pem.contains("BEGIN CERTIFICATE"));
        assert!(certified_key(&pair.chain_pem, &pair.key_pem).is_ok());
    }

    #[test]
    fn alpn_certificate_builds() {
        let key = alpn_challenge("acme.com", &[7u8; 32]).unwrap();
        assert_eq!(key.cert.len(), 1);
    }
}
