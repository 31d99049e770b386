//! Certificate store and SNI resolution.
//!
//! # Data Flow
//! ```text
//! ClientHello(sni, alpn)
//!     → alpn offers acme-tls/1?   → pending TLS-ALPN-01 certificate
//!     → development?              → the self-signed development certificate
//!     → sni not allowed and no
//!       site directory on disk?   → DomainNotAllowed (handshake fails)
//!     → memory → disk             → certificate
//!     → otherwise                 → start acquisition in the background, fail this handshake
//! ```
//!
//! # Design Decisions
//! - The rustls callback is synchronous; it never waits on ACME
//! - At most one acquisition per name is in flight
//! - Names are compared lowercase; `www.` shares its bare host's allow entry
//! - A site that exists on disk but has not been loaded yet is allowed, so
//!   its first request can arrive over HTTPS

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;

use crate::sandbox::PathValidator;
use crate::tenant::manager::{is_valid_host, CONFIG_FILE};
use crate::tls::acme::AcmeIssuer;
use crate::tls::challenge::{ChallengeStore, ACME_TLS_ALPN};
use crate::tls::self_signed::{self, PemPair};
use crate::tls::{pem, TlsError};

/// Directory (below `certs_dir`) holding the development certificate.
pub const DEV_CERT_NAME: &str = "dev";

/// Hosts certificates may be issued for.
#[derive(Debug, Default)]
pub struct AllowList {
    hosts: RwLock<HashSet<String>>,
}

impl AllowList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, host: &str) {
        self.hosts
            .write()
            .expect("allow list lock poisoned")
            .insert(host.to_ascii_lowercase());
    }

    pub fn remove(&self, host: &str) {
        self.hosts
            .write()
            .expect("allow list lock poisoned")
            .remove(&host.to_ascii_lowercase());
    }

    pub fn contains(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        let hosts = self.hosts.read().expect("allow list lock poisoned");
        hosts.contains(&name) || name.strip_prefix("www.").is_some_and(|bare| hosts.contains(bare))
    }

    pub fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self
            .hosts
            .read()
            .expect("allow list lock poisoned")
            .iter()
            .cloned()
            .collect();
        hosts.sort();
        hosts
    }
}

enum Mode {
    Development(Arc<CertifiedKey>),
    Acme(Arc<AcmeIssuer>),
}

pub struct CertStore {
    mode: Mode,
    validator: Arc<PathValidator>,
    certs_dir: String,
    sites_dir: Option<String>,
    allow: Arc<AllowList>,
    challenges: Arc<ChallengeStore>,
    cache: RwLock<HashMap<String, Arc<CertifiedKey>>>,
    pending: Mutex<HashSet<String>>,
}

impl fmt::Debug for CertStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertStore")
            .field("development", &self.is_development())
            .field("certs_dir", &self.certs_dir)
            .finish()
    }
}

impl CertStore {
    /// Store serving one self-signed certificate for every name. An existing
    /// pair under `<certs_dir>/dev/` is reused, otherwise one is generated
    /// and written there.
    pub async fn development(
        validator: Arc<PathValidator>,
        certs_dir: impl Into<String>,
        names: &[String],
        allow: Arc<AllowList>,
    ) -> Result<Self, TlsError> {
        let certs_dir = certs_dir.into();
        let existing = pem::load_blocking(&validator, &certs_dir, DEV_CERT_NAME)?;
        let cert = match existing {
            Some(cert) => cert,
            None => {
                let names = self_signed::development_names(names);
                let PemPair { chain_pem, key_pem } = self_signed::generate(&names)?;
                pem::store(&validator, &certs_dir, DEV_CERT_NAME, &chain_pem, &key_pem).await?;
                tracing::info!(names = ?names, dir = %pem::cert_dir(&certs_dir, DEV_CERT_NAME), "Generated development certificate");
                pem::certified_key(&chain_pem, &key_pem)?
            }
        };

        Ok(Self {
            mode: Mode::Development(cert),
            validator,
            certs_dir,
            sites_dir: None,
            allow,
            challenges: Arc::new(ChallengeStore::new()),
            cache: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashSet::new()),
        })
    }

    pub fn acme(
        validator: Arc<PathValidator>,
        certs_dir: impl Into<String>,
        issuer: Arc<AcmeIssuer>,
        challenges: Arc<ChallengeStore>,
        allow: Arc<AllowList>,
    ) -> Self {
        Self {
            mode: Mode::Acme(issuer),
            validator,
            certs_dir: certs_dir.into(),
            sites_dir: None,
            allow,
            challenges,
            cache: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashSet::new()),
        }
    }

    /// Also allow names with a site directory below `sites_dir` (relative to
    /// the project root) that has not been loaded yet.
    pub fn with_sites_dir(mut self, sites_dir: impl Into<String>) -> Self {
        self.sites_dir = Some(sites_dir.into());
        self
    }

    /// Allow-listed, or present on disk as `<sites_dir>/<host>/config.toml`.
    /// A name found on disk is added to the allow-list.
    pub fn is_allowed(&self, name: &str) -> bool {
        if self.allow.contains(name) {
            return true;
        }
        let Some(sites_dir) = &self.sites_dir else {
            return false;
        };
        let name = name.to_ascii_lowercase();
        let bare = name.strip_prefix("www.").unwrap_or(&name);
        let on_disk = [name.as_str(), bare].into_iter().find(|host| {
            is_valid_host(host)
                && self
                    .validator
                    .resolve(&format!("{}/{}/{}", sites_dir, host, CONFIG_FILE))
                    .is_ok_and(|path| path.is_file())
        });
        match on_disk {
            Some(host) => {
                tracing::debug!(host = %host, "Allowing unloaded site found on disk");
                self.allow.insert(host);
                true
            }
            None => false,
        }
    }

    pub fn is_development(&self) -> bool {
        matches!(self.mode, Mode::Development(_))
    }

    pub fn allow_list(&self) -> &Arc<AllowList> {
        &self.allow
    }

    pub fn challenges(&self) -> &Arc<ChallengeStore> {
        &self.challenges
    }

    /// Memory, then disk. Never contacts the CA.
    pub fn cached(&self, name: &str) -> Result<Option<Arc<CertifiedKey>>, TlsError> {
        if let Mode::Development(cert) = &self.mode {
            return Ok(Some(Arc::clone(cert)));
        }
        if let Some(cert) = self.cache.read().expect("cert cache lock poisoned").get(name) {
            return Ok(Some(Arc::clone(cert)));
        }
        match pem::load_blocking(&self.validator, &self.certs_dir, name)? {
            Some(cert) => {
                self.cache
                    .write()
                    .expect("cert cache lock poisoned")
                    .insert(name.to_string(), Arc::clone(&cert));
                Ok(Some(cert))
            }
            None => Ok(None),
        }
    }

    /// Full lookup: memory → disk → acquire → cache.
    pub async fn get_certificate(&self, sni: &str) -> Result<Arc<CertifiedKey>, TlsError> {
        let name = sni.trim_end_matches('.').to_ascii_lowercase();
        if !self.is_development() && !self.is_allowed(&name) {
            return Err(TlsError::DomainNotAllowed(name));
        }
        if let Some(cert) = self.cached(&name)? {
            return Ok(cert);
        }

        let Mode::Acme(issuer) = &self.mode else {
            return Err(TlsError::acquire(&name, "no issuer"));
        };
        let pair = issuer
            .issue(&name)
            .await
            .map_err(|e| TlsError::acquire(&name, e.to_string()))?;
        pem::store(&self.validator, &self.certs_dir, &name, &pair.chain_pem, &pair.key_pem).await?;
        let cert = pem::certified_key(&pair.chain_pem, &pair.key_pem)?;
        self.cache
            .write()
            .expect("cert cache lock poisoned")
            .insert(name, Arc::clone(&cert));
        Ok(cert)
    }

    /// Kick off acquisition for `name` unless one is already running.
    fn acquire_in_background(self: &Arc<Self>, name: String) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        if !self.pending.lock().expect("pending set poisoned").insert(name.clone()) {
            return;
        }
        let store = Arc::clone(self);
        handle.spawn(async move {
            if let Err(e) = store.get_certificate(&name).await {
                tracing::warn!(domain = %name, error = %e, "Background certificate acquisition failed");
            }
            store.pending.lock().expect("pending set poisoned").remove(&name);
        });
    }

    pub fn resolver(self: &Arc<Self>) -> Arc<SniResolver> {
        Arc::new(SniResolver {
            store: Arc::clone(self),
        })
    }

    /// rustls server configuration using this store for every handshake.
    pub fn rustls_config(self: &Arc<Self>) -> Result<rustls::ServerConfig, TlsError> {
        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let mut config = rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_cert_resolver(self.resolver());
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec(), ACME_TLS_ALPN.to_vec()];
        Ok(config)
    }
}

/// rustls SNI callback backed by a [`CertStore`].
pub struct SniResolver {
    store: Arc<CertStore>,
}

impl fmt::Debug for SniResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SniResolver").field("store", &self.store).finish()
    }
}

impl SniResolver {
    fn select(&self, sni: Option<&str>, acme_alpn: bool) -> Result<Arc<CertifiedKey>, TlsError> {
        let store = &self.store;
        if let Mode::Development(cert) = &store.mode {
            return Ok(Arc::clone(cert));
        }
        let name = sni
            .map(|s| s.trim_end_matches('.').to_ascii_lowercase())
            .ok_or_else(|| TlsError::DomainNotAllowed(String::new()))?;

        if acme_alpn {
            return store
                .challenges
                .alpn_certificate(&name)
                .ok_or_else(|| TlsError::acquire(&name, "no pending tls-alpn-01 challenge"));
        }
        if !store.is_allowed(&name) {
            return Err(TlsError::DomainNotAllowed(name));
        }
        match store.cached(&name)? {
            Some(cert) => Ok(cert),
            None => {
                store.acquire_in_background(name.clone());
                Err(TlsError::acquire(&name, "acquisition in progress"))
            }
        }
    }
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let acme_alpn = client_hello
            .alpn()
            .is_some_and(|mut protocols| protocols.any(|p| p == ACME_TLS_ALPN));
        match self.select(client_hello.server_name(), acme_alpn) {
            Ok(cert) => Some(cert),
            Err(e) => {
                tracing::warn!(sni = ?client_hello.server_name(), error = %e, "TLS handshake refused");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChallengeKind;

    fn validator() -> (tempfile::TempDir, Arc<PathValidator>) {
        let dir = tempfile::tempdir().unwrap();
        let v = Arc::new(PathValidator::new(dir.path()).unwrap());
        (dir, v)
    }

    #[test]
    fn allow_list_matches_www() {
        let allow = AllowList::new();
        allow.insert("Acme.com");
        assert!(allow.contains("acme.com"));
        assert!(allow.contains("www.acme.com"));
        assert!(!allow.contains("evil.com"));
        assert_eq!(allow.hosts(), vec!["acme.com".to_string()]);
    }

    #[tokio::test]
    async fn development_store_serves_every_name_and_persists() {
        let (dir, v) = validator();
        let store = Arc::new(
            CertStore::development(Arc::clone(&v), "certs", &["localhost".to_string()], Arc::new(AllowList::new()))
                .await
                .unwrap(),
        );
        assert!(dir.path().join("certs/dev/fullchain.pem").exists());
        assert!(store.get_certificate("anything.localhost").await.is_ok());
        assert!(store.resolver().select(None, false).is_ok());
    }

    fn acme_store(v: Arc<PathValidator>) -> Arc<CertStore> {
        let challenges = Arc::new(ChallengeStore::new());
        let issuer = Arc::new(AcmeIssuer::new(
            "https://127.0.0.1:1/directory",
            None,
            ChallengeKind::Http01,
            Arc::clone(&challenges),
            Arc::clone(&v),
            "certs",
        ));
        Arc::new(CertStore::acme(v, "certs", issuer, challenges, Arc::new(AllowList::new())))
    }

    #[tokio::test]
    async fn acme_store_refuses_unknown_domains() {
        let (_dir, v) = validator();
        let store = acme_store(v);
        assert!(matches!(
            store.get_certificate("evil.com").await,
            Err(TlsError::DomainNotAllowed(_))
        ));
        assert!(matches!(
            store.resolver().select(Some("evil.com"), false),
            Err(TlsError::DomainNotAllowed(_))
        ));
    }

    #[tokio::test]
    async fn acme_store_serves_stored_certificates() {
        let (_dir, v) = validator();
        let pair = self_signed::generate(&["acme.com".to_string()]).unwrap();
        pem::store(&v, "certs", "acme.com", &pair.chain_pem, &pair.key_pem).await.unwrap();

        let store = acme_store(Arc::clone(&v));
        store.allow_list().insert("acme.com");
        assert!(store.resolver().select(Some("ACME.com."), false).is_ok());
        assert!(store.get_certificate("acme.com").await.is_ok());
    }

    #[tokio::test]
    async fn unloaded_site_on_disk_is_allowed() {
        let (dir, v) = validator();
        std::fs::create_dir_all(dir.path().join("sites/new.test")).unwrap();
        std::fs::write(dir.path().join("sites/new.test/config.toml"), "name = \"new\"").unwrap();
        let pair = self_signed::generate(&["new.test".to_string()]).unwrap();
        pem::store(&v, "certs", "new.test", &pair.chain_pem, &pair.key_pem).await.unwrap();

        let without_sites = acme_store(Arc::clone(&v));
        assert!(matches!(
            without_sites.resolver().select(Some("new.test"), false),
            Err(TlsError::DomainNotAllowed(_))
        ));

        let challenges = Arc::new(ChallengeStore::new());
        let issuer = Arc::new(AcmeIssuer::new(
            "https://127.0.0.1:1/directory",
            None,
            ChallengeKind::Http01,
            Arc::clone(&challenges),
            Arc::clone(&v),
            "certs",
        ));
        let store = Arc::new(
            CertStore::acme(Arc::clone(&v), "certs", issuer, challenges, Arc::new(AllowList::new()))
                .with_sites_dir("sites"),
        );
        assert!(store.resolver().select(Some("new.test"), false).is_ok());
        assert!(store.is_allowed("www.new.test"));
        assert!(store.allow_list().contains("new.test"));

        assert!(!store.is_allowed("other.test"));
        assert!(!store.is_allowed("../certs"));
        assert!(matches!(
            store.resolver().select(Some("other.test"), false),
            Err(TlsError::DomainNotAllowed(_))
        ));
    }

    #[tokio::test]
    async fn alpn_challenge_certificate_is_served() {
        let (_dir, v) = validator();
        let store = acme_store(v);
        assert!(store.resolver().select(Some("acme.com"), true).is_err());
        store.challenges().put_alpn("acme.com", &[9u8; 32]).unwrap();
        assert!(store.resolver().select(Some("acme.com"), true).is_ok());
    }
}
