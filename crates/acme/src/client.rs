//! Cancellable obtain/revoke.
//!
//! Each call runs on its own task; the caller waits on whichever finishes
//! first, the task or its cancellation token.  A result that arrives after
//! cancellation is dropped.

use std::future::Future;
use std::sync::Arc;

use db::models::AcmeAccount;
use db::repository::AcmeAccountRepository;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::account::AccountManager;
use crate::backend::{AccountCredentials, AcmeBackend, IssuedCertificate, OrderRequest};
use crate::ca::ResolvedCa;
use crate::AcmeError;

#[derive(Clone)]
pub struct AcmeClient {
    accounts: Arc<AccountManager>,
    backend: Arc<dyn AcmeBackend>,
}

impl AcmeClient {
    pub fn new(repo: Arc<dyn AcmeAccountRepository>, backend: Arc<dyn AcmeBackend>) -> Self {
        Self {
            accounts: Arc::new(AccountManager::new(repo, backend.clone())),
            backend,
        }
    }

    pub fn accounts(&self) -> &AccountManager {
        &self.accounts
    }

    pub async fn acquire_account(
        &self,
        ca: &ResolvedCa,
        email: &str,
    ) -> Result<AcmeAccount, AcmeError> {
        self.accounts.acquire(ca, email).await
    }

    /// Obtain a certificate.  An "already replaced" answer is retried once
    /// without the `replaces` hint.
    #[instrument(skip_all, fields(account_url = %account.account_url))]
    pub async fn obtain(
        &self,
        account: &AcmeAccount,
        order: OrderRequest,
        cancel: &CancellationToken,
    ) -> Result<IssuedCertificate, AcmeError> {
        let backend = self.backend.clone();
        let credentials = AccountCredentials::from(account);

        run_cancellable(cancel, async move {
            match backend.obtain(&credentials, &order).await {
                Err(err) if err.is_ari_conflict() => {
                    warn!(error = %err, "ari conflict, retrying without replaces");
                    let retry = OrderRequest {
                        replaces: None,
                        ..order
                    };
                    backend.obtain(&credentials, &retry).await
                }
                other => other,
            }
        })
        .await
    }

    #[instrument(skip_all, fields(account_url = %account.account_url))]
    pub async fn revoke(
        &self,
        account: &AcmeAccount,
        certificate_pem: &str,
        cancel: &CancellationToken,
    ) -> Result<(), AcmeError> {
        let backend = self.backend.clone();
        let credentials = AccountCredentials::from(account);
        let pem = certificate_pem.to_string();

        run_cancellable(cancel, async move { backend.revoke(&credentials, &pem).await }).await
    }
}

async fn run_cancellable<T, F>(cancel: &CancellationToken, work: F) -> Result<T, AcmeError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, AcmeError>> + Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(AcmeError::Cancelled);
    }

    let handle = tokio::spawn(work);
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("cancelled; late result will be discarded");
            Err(AcmeError::Cancelled)
        }
        joined = handle => match joined {
            Ok(result) => result,
            Err(e) => Err(AcmeError::Http(format!("acme task failed: {e}"))),
        },
    }
}
