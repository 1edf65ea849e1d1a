//! Router tests over the in-memory store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use acme::{
    AccountCredentials, AcmeBackend, AcmeClient, AcmeError, IssuedCertificate, OrderRequest,
    RegisterRequest, RegisteredAccount,
};
use api::{router, AppState};
use db::models::{AcmeAccount, Certificate, CertificateSource};
use db::repository::{AcmeAccountRepository, CertificateRepository};
use db::{MemoryStore, NodeType, Repositories};
use engine::NodeRegistry;
use nodes::executors::{EndNode, StartNode};
use queue::{CronScheduler, DispatcherConfig, WorkflowDispatcher, WorkflowScheduler};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RevokeRecorder {
    revoked: Mutex<Vec<String>>,
}

#[async_trait]
impl AcmeBackend for RevokeRecorder {
    async fn register(&self, _: &RegisterRequest) -> Result<RegisteredAccount, AcmeError> {
        Err(AcmeError::Registration("not supported in tests".into()))
    }

    async fn obtain(
        &self,
        _: &AccountCredentials,
        _: &OrderRequest,
    ) -> Result<IssuedCertificate, AcmeError> {
        Err(AcmeError::Certificate("not supported in tests".into()))
    }

    async fn revoke(&self, account: &AccountCredentials, _: &str) -> Result<(), AcmeError> {
        self.revoked.lock().unwrap().push(account.account_url.clone());
        Ok(())
    }
}

struct TestApp {
    app: Router,
    store: Arc<MemoryStore>,
    backend: Arc<RevokeRecorder>,
}

async fn test_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let repos = Repositories::from_store(store.clone());
    let backend = Arc::new(RevokeRecorder::default());
    let acme = AcmeClient::new(repos.accounts.clone(), backend.clone());

    let mut registry = NodeRegistry::new();
    registry.insert(NodeType::Start, Arc::new(StartNode));
    registry.insert(NodeType::End, Arc::new(EndNode));
    let dispatcher =
        WorkflowDispatcher::new(repos.clone(), registry, DispatcherConfig { max_concurrency: 2 });
    dispatcher.bootup().await.unwrap();
    let scheduler = WorkflowScheduler::new(CronScheduler::new(), repos.clone(), dispatcher.clone());

    let app = router(AppState {
        repos,
        dispatcher,
        scheduler,
        acme,
    });
    TestApp {
        app,
        store,
        backend,
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json");
    let request = match body {
        Some(body) => request.body(Body::from(body.to_string())).unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn workflow_body(trigger: &str, cron: Option<&str>) -> Value {
    json!({
        "name": "renew example.com",
        "trigger": trigger,
        "triggerCron": cron,
        "graph": { "nodes": [
            { "id": "start", "type": "start" },
            { "id": "end", "type": "end" }
        ]}
    })
}

fn certificate(account_url: Option<&str>) -> Certificate {
    let now = Utc::now();
    Certificate {
        id: Uuid::new_v4(),
        source: if account_url.is_some() {
            CertificateSource::Request
        } else {
            CertificateSource::Upload
        },
        subject_alt_names: "example.com;www.example.com".into(),
        serial_number: "0a".into(),
        certificate: "-----BEGIN CERTIFICATE-----".into(),
        private_key: "secret".into(),
        issuer_org: "Test CA".into(),
        issuer_certificate: String::new(),
        key_algorithm: "EC_P256".into(),
        valid_from: now,
        valid_to: now + chrono::Duration::days(90),
        acme_account_url: account_url.map(str::to_string),
        acme_cert_url: None,
        ari_cert_id: None,
        is_renewed: false,
        is_revoked: false,
        workflow_id: Uuid::new_v4(),
        run_id: Uuid::new_v4(),
        node_id: "apply".into(),
        created_at: now,
        updated_at: now,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_check() {
    let t = test_app().await;
    let response = t
        .app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn save_and_get_workflow() {
    let t = test_app().await;
    let id = Uuid::new_v4();

    let (status, saved) = send(
        &t.app,
        "PUT",
        &format!("/api/v1/workflows/{id}"),
        Some(workflow_body("manual", None)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saved["id"], json!(id));

    let (status, fetched) = send(&t.app, "GET", &format!("/api/v1/workflows/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], "renew example.com");

    let (status, _) = send(&t.app, "GET", &format!("/api/v1/workflows/{}", Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_graph_is_rejected() {
    let t = test_app().await;
    let body = json!({
        "name": "no start",
        "trigger": "manual",
        "graph": { "nodes": [{ "id": "end", "type": "end" }] }
    });
    let (status, error) = send(
        &t.app,
        "PUT",
        &format!("/api/v1/workflows/{}", Uuid::new_v4()),
        Some(body),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error["code"], "INVALID_WORKFLOW");
}

#[tokio::test]
async fn scheduled_workflow_registers_and_unregisters_job() {
    let t = test_app().await;
    let id = Uuid::new_v4();
    let uri = format!("/api/v1/workflows/{id}");

    let (status, _) = send(&t.app, "PUT", &uri, Some(workflow_body("scheduled", Some("0 3 * * *")))).await;
    assert_eq!(status, StatusCode::OK);
    let (_, jobs) = send(&t.app, "GET", "/api/v1/schedules", None).await;
    assert_eq!(jobs[0]["id"], format!("workflow#{id}"));

    let (status, _) = send(&t.app, "PUT", &uri, Some(workflow_body("scheduled", Some("every day")))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send(&t.app, "PUT", &uri, Some(workflow_body("manual", None))).await;
    assert_eq!(status, StatusCode::OK);
    let (_, jobs) = send(&t.app, "GET", "/api/v1/schedules", None).await;
    assert_eq!(jobs, json!([]));
}

#[tokio::test]
async fn start_run_and_wait_for_success() {
    let t = test_app().await;
    let id = Uuid::new_v4();
    send(&t.app, "PUT", &format!("/api/v1/workflows/{id}"), Some(workflow_body("manual", None))).await;

    let (status, run) = send(&t.app, "POST", &format!("/api/v1/workflows/{id}/runs"), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(run["status"], "pending");
    let run_uri = format!("/api/v1/runs/{}", run["id"].as_str().unwrap());

    let finished = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let (_, run) = send(&t.app, "GET", &run_uri, None).await;
            if run["status"] == "succeeded" {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("run did not finish");
    assert!(finished["ended_at"].is_string());

    let (status, _) = send(&t.app, "POST", &format!("{run_uri}/cancel"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, logs) = send(&t.app, "GET", &format!("{run_uri}/logs"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(logs.as_array().is_some_and(|l| !l.is_empty()));
}

#[tokio::test]
async fn cancel_unknown_run_is_not_found() {
    let t = test_app().await;
    let (status, error) = send(
        &t.app,
        "POST",
        &format!("/api/v1/runs/{}/cancel", Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["code"], "NOT_FOUND");
}

#[tokio::test]
async fn dispatcher_statistics() {
    let t = test_app().await;
    let (status, stats) = send(&t.app, "GET", "/api/v1/dispatcher/statistics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["concurrency"], 2);
    assert_eq!(stats["pendingRunIds"], json!([]));
    assert_eq!(stats["processingRunIds"], json!([]));
}

#[tokio::test]
async fn revoke_marks_certificate_and_hides_private_key() {
    let t = test_app().await;
    let account = AcmeAccount {
        id: Uuid::new_v4(),
        ca: "letsencrypt".into(),
        email: "ops@example.com".into(),
        private_key: "key".into(),
        account: json!({}),
        account_url: "https://ca.test/acct/1".into(),
        directory_url: "https://ca.test/directory".into(),
        created_at: Utc::now(),
    };
    AcmeAccountRepository::save(t.store.as_ref(), &account).await.unwrap();
    let cert = certificate(Some("https://ca.test/acct/1"));
    CertificateRepository::save(t.store.as_ref(), &cert).await.unwrap();
    let uri = format!("/api/v1/certificates/{}/revoke", cert.id);

    let (status, view) = send(&t.app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["isRevoked"], true);
    assert!(view.get("privateKey").is_none());
    assert_eq!(*t.backend.revoked.lock().unwrap(), vec!["https://ca.test/acct/1"]);

    let (status, _) = send(&t.app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn uploaded_certificate_cannot_be_revoked() {
    let t = test_app().await;
    let cert = certificate(None);
    CertificateRepository::save(t.store.as_ref(), &cert).await.unwrap();

    let (status, view) = send(&t.app, "GET", &format!("/api/v1/certificates/{}", cert.id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["domains"], json!(["example.com", "www.example.com"]));

    let (status, bundle) = send(
        &t.app,
        "GET",
        &format!("/api/v1/certificates/{}/download", cert.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bundle["privateKey"], "secret");

    let (status, _) = send(
        &t.app,
        "POST",
        &format!("/api/v1/certificates/{}/revoke", cert.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(t.backend.revoked.lock().unwrap().is_empty());
}
