//! PEM handling and the on-disk certificate layout.
//!
//! Certificates live at `<certs_dir>/<name>/fullchain.pem` and
//! `<certs_dir>/<name>/privkey.pem`, both root-relative.

use std::io::BufReader;
use std::sync::Arc;

use rustls::crypto::aws_lc_rs::sign::any_supported_type;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;

use crate::sandbox::{PathError, PathValidator};
use crate::tls::TlsError;

pub const CHAIN_FILE: &str = "fullchain.pem";
pub const KEY_FILE: &str = "privkey.pem";

/// Directory name for `name`; wildcards become `_wildcard.<rest>`.
pub fn cert_dir(certs_dir: &str, name: &str) -> String {
    let safe = match name.strip_prefix("*.") {
        Some(rest) => format!("_wildcard.{}", rest),
        None => name.to_string(),
    };
    format!("{}/{}", certs_dir.trim_end_matches('/'), safe)
}

/// Parse a PEM chain and key into a rustls signing pair.
pub fn certified_key(chain_pem: &str, key_pem: &str) -> Result<Arc<CertifiedKey>, TlsError> {
    let chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(chain_pem.as_bytes()))
        .collect::<Result<_, _>>()
        .map_err(|e| TlsError::Pem(e.to_string()))?;
    if chain.is_empty() {
        return Err(TlsError::Pem("no certificates in chain".to_string()));
    }
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_pem.as_bytes()))
        .map_err(|e| TlsError::Pem(e.to_string()))?
        .ok_or_else(|| TlsError::Pem("no private key".to_string()))?;
    certified_key_der(chain, key)
}

pub fn certified_key_der(
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<Arc<CertifiedKey>, TlsError> {
    let signing_key = any_supported_type(&key)?;
    Ok(Arc::new(CertifiedKey::new(chain, signing_key)))
}

/// Read a stored pair synchronously. `Ok(None)` when nothing is stored.
pub fn load_blocking(
    validator: &PathValidator,
    certs_dir: &str,
    name: &str,
) -> Result<Option<Arc<CertifiedKey>>, TlsError> {
    let dir = cert_dir(certs_dir, name);
    let chain = match validator.read_to_string_blocking(&format!("{}/{}", dir, CHAIN_FILE)) {
        Ok(chain) => chain,
        Err(PathError::NotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let key = validator.read_to_string_blocking(&format!("{}/{}", dir, KEY_FILE))?;
    certified_key(&chain, &key).map(Some)
}

pub async fn store(
    validator: &PathValidator,
    certs_dir: &str,
    name: &str,
    chain_pem: &str,
    key_pem: &str,
) -> Result<(), TlsError> {
    let dir = cert_dir(certs_dir, name);
    validator.write(&format!("{}/{}", dir, CHAIN_FILE), chain_pem).await?;
    validator.write(&format!("{}/{}", dir, KEY_FILE), key_pem).await?;
    Ok(())
}
