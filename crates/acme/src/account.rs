//! Account acquisition.
//!
//! Accounts are keyed by (CA, directory URL, email).  A persisted account is
//! reused; otherwise one registration runs per key while every concurrent
//! caller for that key awaits the same shared future.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use db::models::AcmeAccount;
use db::repository::AcmeAccountRepository;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::backend::{AcmeBackend, RegisterRequest};
use crate::ca::ResolvedCa;
use crate::jws::AccountKey;
use crate::AcmeError;

type PendingRegistration = Shared<BoxFuture<'static, Result<AcmeAccount, AcmeError>>>;

pub struct AccountManager {
    repo: Arc<dyn AcmeAccountRepository>,
    backend: Arc<dyn AcmeBackend>,
    inflight: DashMap<String, PendingRegistration>,
}

impl AccountManager {
    pub fn new(repo: Arc<dyn AcmeAccountRepository>, backend: Arc<dyn AcmeBackend>) -> Self {
        Self {
            repo,
            backend,
            inflight: DashMap::new(),
        }
    }

    /// Return the account for `(ca, directory, email)`, registering it if
    /// none is stored yet.
    #[instrument(skip(self, ca), fields(ca = %ca.ca, directory = %ca.directory_url))]
    pub async fn acquire(&self, ca: &ResolvedCa, email: &str) -> Result<AcmeAccount, AcmeError> {
        if ca.eab_required && ca.eab.is_none() {
            return Err(AcmeError::EabRequired { ca: ca.ca.clone() });
        }

        if let Some(account) = self
            .repo
            .get_by_ca_and_email(&ca.ca, &ca.directory_url, email)
            .await?
        {
            return Ok(account);
        }

        let key = format!("{}\n{}\n{}", ca.ca, ca.directory_url, email);
        let pending = self
            .inflight
            .entry(key.clone())
            .or_insert_with(|| {
                debug!("starting account registration");
                register(
                    self.repo.clone(),
                    self.backend.clone(),
                    ca.clone(),
                    email.to_string(),
                )
                .boxed()
                .shared()
            })
            .clone();

        let result = pending.clone().await;
        self.inflight.remove_if(&key, |_, current| current.ptr_eq(&pending));
        result
    }

    /// Stored account behind an account URL.
    pub async fn by_url(&self, account_url: &str) -> Result<AcmeAccount, AcmeError> {
        self.repo
            .get_by_account_url(account_url)
            .await?
            .ok_or_else(|| AcmeError::Config(format!("unknown acme account {account_url}")))
    }
}

async fn register(
    repo: Arc<dyn AcmeAccountRepository>,
    backend: Arc<dyn AcmeBackend>,
    ca: ResolvedCa,
    email: String,
) -> Result<AcmeAccount, AcmeError> {
    // A registration that finished just before this one started has
    // already been stored.
    if let Some(account) = repo
        .get_by_ca_and_email(&ca.ca, &ca.directory_url, &email)
        .await?
    {
        return Ok(account);
    }

    let key = AccountKey::generate()?;
    let registered = backend
        .register(&RegisterRequest {
            directory_url: ca.directory_url.clone(),
            email: email.clone(),
            key_pem: key.to_pem().to_string(),
            eab: ca.eab.clone(),
        })
        .await?;

    let account = AcmeAccount {
        id: Uuid::new_v4(),
        ca: ca.ca,
        email,
        private_key: key.to_pem().to_string(),
        account: registered.account,
        account_url: registered.account_url,
        directory_url: ca.directory_url,
        created_at: Utc::now(),
    };
    let saved = repo.save(&account).await?;
    info!(account_url = %saved.account_url, "acme account stored");
    Ok(saved)
}
