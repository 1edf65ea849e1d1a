//! `acme` crate — the certificate-authority client.
//!
//! Layers, leaves first:
//! - [`jws`], [`certs`], [`challenge`], [`dns`]: protocol building blocks
//! - [`backend`]: the wire seam, implemented over HTTPS by [`protocol`]
//! - [`account`]: account acquisition with per-key registration dedup
//! - [`client`]: cancellable obtain/revoke with the one-shot ARI retry

pub mod account;
pub mod backend;
pub mod ca;
pub mod certs;
pub mod challenge;
pub mod client;
pub mod dns;
pub mod error;
pub mod jws;
pub mod protocol;

pub use account::AccountManager;
pub use backend::{
    AccountCredentials, AcmeBackend, ChallengeSolver, IssuedCertificate, KeyAlgorithm,
    OrderRequest, RegisterRequest, RegisteredAccount,
};
pub use ca::{CaSettings, EabCredentials, ResolvedCa};
pub use certs::ParsedCertificate;
pub use challenge::{ChallengeProvider, ChallengeProviderRegistry, ChallengeType, WebrootProvider};
pub use client::AcmeClient;
pub use error::AcmeError;
pub use protocol::HttpBackend;
