// Account dedup, ARI retry and cancellation against a scripted backend.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use acme::challenge::ChallengeProvider;
use acme::{
    AccountCredentials, AcmeBackend, AcmeClient, AcmeError, CaSettings, ChallengeSolver,
    ChallengeType, IssuedCertificate, KeyAlgorithm, OrderRequest, RegisterRequest,
    RegisteredAccount,
};
use assert_matches::assert_matches;
use async_trait::async_trait;
use db::models::AcmeAccount;
use db::MemoryStore;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ScriptedBackend {
    register_calls: AtomicUsize,
    register_fails: bool,
    obtain_results: Mutex<VecDeque<Result<IssuedCertificate, AcmeError>>>,
    obtain_replaces: Mutex<Vec<Option<String>>>,
    obtain_delay: Option<Duration>,
}

impl ScriptedBackend {
    fn with_obtain(results: Vec<Result<IssuedCertificate, AcmeError>>) -> Self {
        Self {
            obtain_results: Mutex::new(results.into()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl AcmeBackend for ScriptedBackend {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisteredAccount, AcmeError> {
        let n = self.register_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        if self.register_fails {
            return Err(AcmeError::Registration("rejected contact".into()));
        }
        Ok(RegisteredAccount {
            account_url: format!("{}/acct/{n}", request.directory_url),
            account: serde_json::json!({ "status": "valid" }),
        })
    }

    async fn obtain(
        &self,
        _account: &AccountCredentials,
        order: &OrderRequest,
    ) -> Result<IssuedCertificate, AcmeError> {
        self.obtain_replaces
            .lock()
            .unwrap()
            .push(order.replaces.clone());
        if let Some(delay) = self.obtain_delay {
            tokio::time::sleep(delay).await;
        }
        self.obtain_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AcmeError::Http("script exhausted".into())))
    }

    async fn revoke(&self, _: &AccountCredentials, _: &str) -> Result<(), AcmeError> {
        Ok(())
    }
}

struct NoopProvider;

#[async_trait]
impl ChallengeProvider for NoopProvider {
    async fn present(&self, _: &str, _: &str, _: &str) -> Result<(), AcmeError> {
        Ok(())
    }
    async fn clean_up(&self, _: &str, _: &str, _: &str) -> Result<(), AcmeError> {
        Ok(())
    }
}

fn order(replaces: Option<&str>) -> OrderRequest {
    OrderRequest {
        identifiers: vec!["example.com".into()],
        solver: ChallengeSolver {
            challenge_type: ChallengeType::Http01,
            provider: Arc::new(NoopProvider),
            dns_propagation_wait: None,
            dns_propagation_timeout: None,
            dns_nameservers: vec![],
            http_delay: None,
        },
        key_algorithm: KeyAlgorithm::Ec256,
        private_key_pem: None,
        not_before: None,
        not_after: None,
        preferred_chain: None,
        replaces: replaces.map(str::to_string),
    }
}

fn issued(url: &str) -> IssuedCertificate {
    IssuedCertificate {
        certificate_pem: String::new(),
        private_key_pem: String::new(),
        issuer_certificate_pem: String::new(),
        cert_url: url.into(),
        ari_replaced: false,
    }
}

fn account() -> AcmeAccount {
    AcmeAccount {
        id: uuid::Uuid::new_v4(),
        ca: "letsencrypt".into(),
        email: "ops@example.com".into(),
        private_key: String::new(),
        account: serde_json::Value::Null,
        account_url: "https://ca/acct/1".into(),
        directory_url: "https://ca/directory".into(),
        created_at: chrono::Utc::now(),
    }
}

fn letsencrypt() -> acme::ResolvedCa {
    CaSettings::default().resolve().unwrap()
}

// ---------------------------------------------------------------------------
// Account acquisition
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_acquire_registers_once() {
    let backend = Arc::new(ScriptedBackend::default());
    let client = AcmeClient::new(Arc::new(MemoryStore::new()), backend.clone());
    let ca = letsencrypt();

    let results = futures::future::join_all(
        (0..8).map(|_| client.acquire_account(&ca, "ops@example.com")),
    )
    .await;

    assert_eq!(backend.register_calls.load(Ordering::SeqCst), 1);
    let first = results[0].as_ref().unwrap();
    for result in &results {
        let account = result.as_ref().unwrap();
        assert_eq!(account.id, first.id);
        assert_eq!(account.account_url, first.account_url);
    }

    // Stored account is reused afterwards.
    let again = client.acquire_account(&ca, "ops@example.com").await.unwrap();
    assert_eq!(again.id, first.id);
    assert_eq!(backend.register_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_acquire_shares_the_failure() {
    let backend = Arc::new(ScriptedBackend {
        register_fails: true,
        ..Default::default()
    });
    let client = AcmeClient::new(Arc::new(MemoryStore::new()), backend.clone());
    let ca = letsencrypt();

    let results = futures::future::join_all(
        (0..5).map(|_| client.acquire_account(&ca, "ops@example.com")),
    )
    .await;

    assert_eq!(backend.register_calls.load(Ordering::SeqCst), 1);
    for result in results {
        assert_matches!(result, Err(AcmeError::Registration(msg)) if msg == "rejected contact");
    }
}

#[tokio::test]
async fn distinct_emails_register_separately() {
    let backend = Arc::new(ScriptedBackend::default());
    let client = AcmeClient::new(Arc::new(MemoryStore::new()), backend.clone());
    let ca = letsencrypt();

    let (a, b) = tokio::join!(
        client.acquire_account(&ca, "a@example.com"),
        client.acquire_account(&ca, "b@example.com"),
    );

    assert_ne!(a.unwrap().id, b.unwrap().id);
    assert_eq!(backend.register_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn eab_required_without_credentials_is_a_caller_error() {
    let backend = Arc::new(ScriptedBackend::default());
    let client = AcmeClient::new(Arc::new(MemoryStore::new()), backend.clone());
    let ca = acme::ResolvedCa {
        ca: "zerossl".into(),
        directory_url: "https://acme.zerossl.com/v2/DV90".into(),
        eab: None,
        eab_required: true,
    };

    let err = client.acquire_account(&ca, "ops@example.com").await.unwrap_err();
    assert_matches!(err, AcmeError::EabRequired { .. });
    assert_eq!(backend.register_calls.load(Ordering::SeqCst), 0);
}

// ---------------------------------------------------------------------------
// Obtain
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ari_conflict_retries_once_without_replaces() {
    let backend = Arc::new(ScriptedBackend::with_obtain(vec![
        Err(AcmeError::AriConflict("already replaced".into())),
        Ok(issued("https://ca/cert/2")),
    ]));
    let client = AcmeClient::new(Arc::new(MemoryStore::new()), backend.clone());

    let cert = client
        .obtain(&account(), order(Some("aki.serial")), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(cert.cert_url, "https://ca/cert/2");
    assert_eq!(
        *backend.obtain_replaces.lock().unwrap(),
        vec![Some("aki.serial".to_string()), None]
    );
}

#[tokio::test]
async fn ari_conflict_is_not_retried_twice() {
    let backend = Arc::new(ScriptedBackend::with_obtain(vec![
        Err(AcmeError::AriConflict("already replaced".into())),
        Err(AcmeError::AriConflict("still replaced".into())),
        Ok(issued("https://ca/cert/never")),
    ]));
    let client = AcmeClient::new(Arc::new(MemoryStore::new()), backend.clone());

    let err = client
        .obtain(&account(), order(Some("aki.serial")), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_matches!(err, AcmeError::AriConflict(msg) if msg == "still replaced");
    assert_eq!(backend.obtain_replaces.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn other_errors_are_not_retried() {
    let backend = Arc::new(ScriptedBackend::with_obtain(vec![Err(AcmeError::Problem {
        kind: "urn:ietf:params:acme:error:rejectedIdentifier".into(),
        detail: "no".into(),
        status: 400,
    })]));
    let client = AcmeClient::new(Arc::new(MemoryStore::new()), backend.clone());

    let err = client
        .obtain(&account(), order(None), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_matches!(err, AcmeError::Problem { status: 400, .. });
    assert_eq!(backend.obtain_replaces.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn cancellation_wins_over_a_slow_authority() {
    let backend = Arc::new(ScriptedBackend {
        obtain_results: Mutex::new(vec![Ok(issued("https://ca/cert/late"))].into()),
        obtain_delay: Some(Duration::from_secs(30)),
        ..Default::default()
    });
    let client = AcmeClient::new(Arc::new(MemoryStore::new()), backend);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = client
        .obtain(&account(), order(None), &cancel)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn already_cancelled_token_short_circuits() {
    let backend = Arc::new(ScriptedBackend::default());
    let client = AcmeClient::new(Arc::new(MemoryStore::new()), backend.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = client
        .revoke(&account(), "pem", &cancel)
        .await
        .unwrap_err();
    assert_matches!(err, AcmeError::Cancelled);
}
