//! ACME certificate issuance.
//!
//! # Challenge Flow
//! ```text
//! new order ──▶ for each pending authorization:
//!                 http-01     → ChallengeStore::put_http(token, key auth)
//!                 tls-alpn-01 → ChallengeStore::put_alpn(domain, digest)
//!               set challenge ready
//!          ──▶ poll until Ready (backoff) ──▶ finalize with CSR ──▶ poll certificate
//!          ──▶ clear challenges
//! ```
//!
//! The ACME account is created on first use and its credentials are kept
//! at `<certs_dir>/acme-account.json` for later runs.

use std::sync::Arc;
use std::time::Duration;

use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount, NewOrder,
    OrderStatus,
};
use rcgen::{CertificateParams, DistinguishedName, KeyPair};
use tokio::sync::OnceCell;

use crate::config::ChallengeKind;
use crate::sandbox::{PathError, PathValidator};
use crate::tls::challenge::ChallengeStore;
use crate::tls::self_signed::PemPair;
use crate::tls::TlsError;

const ACCOUNT_FILE: &str = "acme-account.json";
const MAX_POLLS: u32 = 10;

pub struct AcmeIssuer {
    directory_url: String,
    contact: Vec<String>,
    challenge: ChallengeKind,
    challenges: Arc<ChallengeStore>,
    validator: Arc<PathValidator>,
    certs_dir: String,
    account: OnceCell<Account>,
}

impl AcmeIssuer {
    pub fn new(
        directory_url: impl Into<String>,
        contact_email: Option<&str>,
        challenge: ChallengeKind,
        challenges: Arc<ChallengeStore>,
        validator: Arc<PathValidator>,
        certs_dir: impl Into<String>,
    ) -> Self {
        Self {
            directory_url: directory_url.into(),
            contact: contact_email.map(|e| format!("mailto:{}", e)).into_iter().collect(),
            challenge,
            challenges,
            validator,
            certs_dir: certs_dir.into(),
            account: OnceCell::new(),
        }
    }

    pub fn directory_url(&self) -> &str {
        &self.directory_url
    }

    async fn account(&self) -> Result<&Account, TlsError> {
        self.account.get_or_try_init(|| self.load_or_create_account()).await
    }

    async fn load_or_create_account(&self) -> Result<Account, TlsError> {
        let path = format!("{}/{}", self.certs_dir, ACCOUNT_FILE);
        match self.validator.read_to_string(&path).await {
            Ok(json) => {
                let credentials: AccountCredentials =
                    serde_json::from_str(&json).map_err(|e| TlsError::Pem(e.to_string()))?;
                tracing::info!(directory = %self.directory_url, "Loaded ACME account");
                return Ok(Account::from_credentials(credentials).await?);
            }
            Err(PathError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let contact: Vec<&str> = self.contact.iter().map(String::as_str).collect();
        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &contact,
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            &self.directory_url,
            None,
        )
        .await?;

        let json = serde_json::to_string_pretty(&credentials).map_err(|e| TlsError::Pem(e.to_string()))?;
        self.validator.write(&path, json).await?;
        tracing::info!(directory = %self.directory_url, "Created ACME account");
        Ok(account)
    }

    /// Obtain a certificate for `domain`.
    pub async fn issue(&self, domain: &str) -> Result<PemPair, TlsError> {
        let account = self.account().await?;
        let identifiers = [Identifier::Dns(domain.to_string())];
        let mut order = account.new_order(&NewOrder { identifiers: &identifiers }).await?;

        let authorizations = order.authorizations().await?;
        let mut http_tokens = Vec::new();
        let wanted = match self.challenge {
            ChallengeKind::Http01 => ChallengeType::Http01,
            ChallengeKind::TlsAlpn01 => ChallengeType::TlsAlpn01,
        };

        let result: Result<PemPair, TlsError> = async {
            for authz in &authorizations {
                match authz.status {
                    AuthorizationStatus::Pending => {}
                    AuthorizationStatus::Valid => continue,
                    other => {
                        return Err(TlsError::acquire(domain, format!("authorization is {:?}", other)));
                    }
                }
                let challenge = authz
                    .challenges
                    .iter()
                    .find(|c| c.r#type == wanted)
                    .ok_or_else(|| TlsError::acquire(domain, format!("no {:?} challenge offered", wanted)))?;

                let key_auth = order.key_authorization(challenge);
                match self.challenge {
                    ChallengeKind::Http01 => {
                        self.challenges.put_http(challenge.token.clone(), key_auth.as_str());
                        http_tokens.push(challenge.token.clone());
                    }
                    ChallengeKind::TlsAlpn01 => {
                        self.challenges.put_alpn(domain, key_auth.digest().as_ref())?;
                    }
                }
                order.set_challenge_ready(&challenge.url).await?;
            }

            let mut delay = Duration::from_millis(250);
            let mut polls = 0;
            loop {
                tokio::time::sleep(delay).await;
                let state = order.refresh().await?;
                match state.status {
                    OrderStatus::Ready => break,
                    OrderStatus::Invalid => {
                        return Err(TlsError::acquire(domain, "order became invalid"));
                    }
                    _ => {}
                }
                polls += 1;
                if polls >= MAX_POLLS {
                    return Err(TlsError::acquire(domain, "timed out waiting for validation"));
                }
                delay = (delay * 2).min(Duration::from_secs(10));
            }

            let mut params = CertificateParams::new(vec![domain.to_string()])?;
            params.distinguished_name = DistinguishedName::new();
            let key = KeyPair::generate()?;
            let csr = params.serialize_request(&key)?;
            order.finalize(csr.der()).await?;

            let mut polls = 0;
            let chain_pem = loop {
                if let Some(chain) = order.certificate().await? {
                    break chain;
                }
                polls += 1;
                if polls >= MAX_POLLS {
                    return Err(TlsError::acquire(domain, "timed out waiting for certificate"));
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            };

            Ok(PemPair {
                chain_pem,
                key_pem: key.serialize_pem(),
            })
        }
        .await;

        for token in &http_tokens {
            self.challenges.remove_http(token);
        }
        self.challenges.remove_alpn(domain);

        match &result {
            Ok(_) => tracing::info!(domain = %domain, "Certificate issued"),
            Err(e) => tracing::error!(domain = %domain, error = %e, "Certificate issuance failed"),
        }
        result
    }
}
