//! The protocol seam between account/client orchestration and the wire.
//!
//! [`crate::protocol::HttpBackend`] speaks ACME v2 over HTTPS; tests plug in
//! scripted implementations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ca::EabCredentials;
use crate::challenge::{ChallengeProvider, ChallengeType};
use crate::AcmeError;

#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub directory_url: String,
    pub email: String,
    /// PKCS#8 PEM of the freshly generated account key.
    pub key_pem: String,
    pub eab: Option<EabCredentials>,
}

#[derive(Debug, Clone)]
pub struct RegisteredAccount {
    pub account_url: String,
    pub account: serde_json::Value,
}

/// What the wire layer needs to act as an existing account.
#[derive(Debug, Clone)]
pub struct AccountCredentials {
    pub key_pem: String,
    pub account_url: String,
    pub directory_url: String,
}

impl From<&db::models::AcmeAccount> for AccountCredentials {
    fn from(account: &db::models::AcmeAccount) -> Self {
        Self {
            key_pem: account.private_key.clone(),
            account_url: account.account_url.clone(),
            directory_url: account.directory_url.clone(),
        }
    }
}

/// Key type for newly generated certificate keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    #[default]
    Ec256,
    Ec384,
}

impl KeyAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ec256 => "ec256",
            Self::Ec384 => "ec384",
        }
    }

    pub(crate) fn generate(self) -> Result<rcgen::KeyPair, AcmeError> {
        let alg = match self {
            Self::Ec256 => &rcgen::PKCS_ECDSA_P256_SHA256,
            Self::Ec384 => &rcgen::PKCS_ECDSA_P384_SHA384,
        };
        Ok(rcgen::KeyPair::generate_for(alg)?)
    }
}

/// Challenge solver configuration for one order.
#[derive(Clone)]
pub struct ChallengeSolver {
    pub challenge_type: ChallengeType,
    pub provider: Arc<dyn ChallengeProvider>,
    /// dns-01: sleep before the first propagation check.
    pub dns_propagation_wait: Option<Duration>,
    /// dns-01: give up on propagation after this long.
    pub dns_propagation_timeout: Option<Duration>,
    /// dns-01: resolvers used for the propagation check.
    pub dns_nameservers: Vec<String>,
    /// http-01: sleep after presenting before asking the authority to validate.
    pub http_delay: Option<Duration>,
}

impl std::fmt::Debug for ChallengeSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeSolver")
            .field("challenge_type", &self.challenge_type)
            .field("dns_propagation_wait", &self.dns_propagation_wait)
            .field("dns_propagation_timeout", &self.dns_propagation_timeout)
            .field("dns_nameservers", &self.dns_nameservers)
            .field("http_delay", &self.http_delay)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    /// Domain names and IP addresses, wildcards allowed.
    pub identifiers: Vec<String>,
    pub solver: ChallengeSolver,
    pub key_algorithm: KeyAlgorithm,
    /// Reuse this key (any algorithm rcgen can load) instead of generating one.
    pub private_key_pem: Option<String>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
    /// Issuer common name of the preferred alternate chain.
    pub preferred_chain: Option<String>,
    /// ARI certificate identifier of the certificate this order replaces.
    pub replaces: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    /// Full chain, leaf first.
    pub certificate_pem: String,
    pub private_key_pem: String,
    /// The chain without the leaf.
    pub issuer_certificate_pem: String,
    pub cert_url: String,
    /// Whether the order carried an accepted `replaces` hint.
    pub ari_replaced: bool,
}

#[async_trait]
pub trait AcmeBackend: Send + Sync {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisteredAccount, AcmeError>;

    async fn obtain(
        &self,
        account: &AccountCredentials,
        order: &OrderRequest,
    ) -> Result<IssuedCertificate, AcmeError>;

    async fn revoke(
        &self,
        account: &AccountCredentials,
        certificate_pem: &str,
    ) -> Result<(), AcmeError>;
}
