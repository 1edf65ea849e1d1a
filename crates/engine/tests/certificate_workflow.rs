// End-to-end runs of an issue -> deploy -> notify graph against a fake
// authority and the in-memory store.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use acme::{
    AccountCredentials, AcmeBackend, AcmeClient, AcmeError, IssuedCertificate, OrderRequest,
    RegisterRequest, RegisteredAccount,
};
use assert_matches::assert_matches;
use async_trait::async_trait;
use db::models::WorkflowTrigger;
use db::repository::CertificateRepository;
use db::{MemoryStore, Node, NodeType, Repositories, WorkflowGraph};
use engine::{standard_registry, validate_graph, EngineError, WorkflowEngine, WorkflowExecution};
use nodes::providers::Notifier;
use nodes::{CertificateProbe, NodeError, NodeServices, ProbeTarget};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Issues self-signed certificates for whatever is ordered.
#[derive(Default)]
struct FakeAuthority {
    issued: AtomicUsize,
}

#[async_trait]
impl AcmeBackend for FakeAuthority {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisteredAccount, AcmeError> {
        Ok(RegisteredAccount {
            account_url: format!("{}/acct/1", request.directory_url),
            account: json!({ "status": "valid" }),
        })
    }

    async fn obtain(
        &self,
        _account: &AccountCredentials,
        order: &OrderRequest,
    ) -> Result<IssuedCertificate, AcmeError> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        let certified = rcgen::generate_simple_self_signed(order.identifiers.clone())
            .map_err(|e| AcmeError::Crypto(e.to_string()))?;
        Ok(IssuedCertificate {
            certificate_pem: certified.cert.pem(),
            private_key_pem: certified.key_pair.serialize_pem(),
            issuer_certificate_pem: String::new(),
            cert_url: format!("https://ca.test/cert/{n}"),
            ari_replaced: false,
        })
    }

    async fn revoke(&self, _: &AccountCredentials, _: &str) -> Result<(), AcmeError> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    subjects: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        _cancel: &CancellationToken,
        subject: &str,
        _message: &str,
    ) -> Result<(), NodeError> {
        self.subjects.lock().unwrap().push(subject.to_string());
        Ok(())
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    authority: Arc<FakeAuthority>,
    notifier: Arc<RecordingNotifier>,
    engine: WorkflowEngine,
    workflow_id: Uuid,
    dir: PathBuf,
}

impl Harness {
    fn new() -> Self {
        Self::with_services(|services| services)
    }

    fn with_services(customize: impl FnOnce(NodeServices) -> NodeServices) -> Self {
        let dir = std::env::temp_dir().join(format!("certflow-it-{}", Uuid::new_v4()));
        let store = Arc::new(MemoryStore::new());
        let repos = Repositories::from_store(store.clone());
        let authority = Arc::new(FakeAuthority::default());
        let acme = AcmeClient::new(repos.accounts.clone(), authority.clone());

        let mut services = NodeServices::new(repos.clone(), acme, &dir);
        let notifier = Arc::new(RecordingNotifier::default());
        let shared = notifier.clone();
        services.notifiers.register(
            "record",
            Arc::new(move |_: &Value, _: &Value| -> Result<Arc<dyn Notifier>, NodeError> {
                Ok(shared.clone())
            }),
        );

        let services = customize(services);
        let engine = WorkflowEngine::new(standard_registry(&services), repos.outputs.clone());
        Self {
            store,
            authority,
            notifier,
            engine,
            workflow_id: Uuid::new_v4(),
            dir,
        }
    }

    fn graph(&self, domains: &str) -> WorkflowGraph {
        WorkflowGraph::new(vec![
            Node::new("start", NodeType::Start),
            Node::new("apply", NodeType::ApplyCertificate).with_config(json!({
                "domains": domains,
                "contactEmail": "ops@example.com",
                "ca": "letsencrypt",
                "challengeType": "http-01",
                "provider": "webroot",
            })),
            Node::new("deploy", NodeType::DeployCertificate).with_config(json!({
                "certificate": "apply#certificate",
                "provider": "local",
                "providerConfig": { "dir": self.deploy_dir().display().to_string(), "name": "site" },
            })),
            Node::new("notify", NodeType::Notify).with_config(json!({
                "provider": "record",
                "subject": "renewed, ${apply.certificate.daysLeft} days left",
                "skipOnAllPrevSkipped": true,
            })),
            Node::new("end", NodeType::End),
        ])
    }

    fn deploy_dir(&self) -> PathBuf {
        self.dir.join("deployed")
    }

    async fn run(&self, graph: WorkflowGraph) {
        self.try_run(graph, CancellationToken::new()).await.unwrap();
    }

    async fn try_run(&self, graph: WorkflowGraph, cancel: CancellationToken) -> Result<(), EngineError> {
        validate_graph(&graph).unwrap();
        self.engine
            .invoke(
                WorkflowExecution {
                    workflow_id: self.workflow_id,
                    workflow_name: "site".into(),
                    run_id: Uuid::new_v4(),
                    trigger: WorkflowTrigger::Scheduled,
                    graph,
                },
                cancel,
            )
            .await
    }

    fn subjects(&self) -> Vec<String> {
        self.notifier.subjects.lock().unwrap().clone()
    }

    fn issued(&self) -> usize {
        self.authority.issued.load(Ordering::SeqCst)
    }

    fn notifications(&self) -> usize {
        self.notifier.subjects.lock().unwrap().len()
    }
}

/// Fails the first `failures` calls, then serves a self-signed leaf for
/// `example.com`.
struct ScriptedProbe {
    failures: usize,
    calls: AtomicUsize,
    targets: Mutex<Vec<ProbeTarget>>,
    der: Vec<u8>,
    /// Cancelled on every call, to stop the run during the retry pause.
    cancel: Option<CancellationToken>,
}

impl ScriptedProbe {
    fn failing(failures: usize) -> Self {
        let certified = rcgen::generate_simple_self_signed(vec!["example.com".to_string()]).unwrap();
        Self {
            failures,
            calls: AtomicUsize::new(0),
            targets: Mutex::new(Vec::new()),
            der: certified.cert.der().to_vec(),
            cancel: None,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CertificateProbe for ScriptedProbe {
    async fn fetch_leaf(&self, target: &ProbeTarget) -> Result<Vec<u8>, NodeError> {
        self.targets.lock().unwrap().push(target.clone());
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
        if n < self.failures {
            Err(NodeError::failed(format!("connection refused ({})", n + 1)))
        } else {
            Ok(self.der.clone())
        }
    }
}

fn monitor_graph() -> WorkflowGraph {
    WorkflowGraph::new(vec![
        Node::new("start", NodeType::Start),
        Node::new("monitor", NodeType::MonitorCertificate).with_config(json!({ "host": "example.com" })),
        Node::new("notify", NodeType::Notify).with_config(json!({
            "provider": "record",
            "subject": "${monitor.certificate.validity} ${monitor.certificate.daysLeft}",
        })),
        Node::new("end", NodeType::End),
    ])
}

fn monitor_harness(probe: &Arc<ScriptedProbe>) -> Harness {
    let probe: Arc<dyn CertificateProbe> = probe.clone();
    Harness::with_services(move |services| {
        services
            .with_probe(probe)
            .with_monitor_retry_delay(Duration::from_millis(5))
    })
}

fn upload_graph(certificate: &str, private_key: &str) -> WorkflowGraph {
    WorkflowGraph::new(vec![
        Node::new("start", NodeType::Start),
        Node::new("upload", NodeType::UploadCertificate).with_config(json!({
            "certificate": certificate,
            "privateKey": private_key,
        })),
        Node::new("notify", NodeType::Notify).with_config(json!({
            "provider": "record",
            "subject": "skipped=${upload.skipped}",
        })),
        Node::new("end", NodeType::End),
    ])
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_run_skips_issuance_deployment_and_notification() {
    let h = Harness::new();
    let cert_file = h.deploy_dir().join("site.crt");

    h.run(h.graph("example.com")).await;
    assert_eq!(h.issued(), 1);
    assert!(cert_file.exists());
    assert_eq!(h.notifications(), 1);
    assert!(h.notifier.subjects.lock().unwrap()[0].starts_with("renewed, "));

    let certificates = h.store.all_certificates().await;
    assert_eq!(certificates.len(), 1);
    assert_eq!(certificates[0].subject_alt_names, "example.com");
    assert_eq!(
        certificates[0].acme_account_url.as_deref(),
        Some("https://acme-v02.api.letsencrypt.org/directory/acct/1")
    );

    std::fs::remove_file(&cert_file).unwrap();
    h.run(h.graph("example.com")).await;

    assert_eq!(h.issued(), 1);
    assert!(!cert_file.exists(), "unchanged certificate must not be redeployed");
    assert_eq!(h.notifications(), 1);
    assert_eq!(h.store.all_certificates().await.len(), 1);
}

#[tokio::test]
async fn changed_domains_trigger_a_new_certificate_and_redeploy() {
    let h = Harness::new();
    let cert_file = h.deploy_dir().join("site.crt");

    h.run(h.graph("example.com")).await;
    std::fs::remove_file(&cert_file).unwrap();

    h.run(h.graph("example.com;www.example.com")).await;

    assert_eq!(h.issued(), 2);
    assert!(cert_file.exists());
    assert_eq!(h.notifications(), 2);

    let latest = h
        .store
        .get_latest_by_workflow_node(h.workflow_id, "apply")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.domains(), vec!["example.com", "www.example.com"]);
}

#[tokio::test]
async fn monitor_retries_until_the_endpoint_answers() {
    let probe = Arc::new(ScriptedProbe::failing(2));
    let h = monitor_harness(&probe);

    h.run(monitor_graph()).await;

    assert_eq!(probe.calls(), 3);
    let subjects = h.subjects();
    assert_eq!(subjects.len(), 1);
    let (validity, days_left) = subjects[0].split_once(' ').unwrap();
    assert_eq!(validity, "true");
    assert!(days_left.parse::<i64>().unwrap() > 0);

    let target = probe.targets.lock().unwrap()[0].clone();
    assert_eq!(target.port, 443);
    assert_eq!(target.domain, "example.com");
}

#[tokio::test]
async fn monitor_fails_after_three_attempts() {
    let probe = Arc::new(ScriptedProbe::failing(usize::MAX));
    let h = monitor_harness(&probe);

    let result = h.try_run(monitor_graph(), CancellationToken::new()).await;

    assert_matches!(result, Err(EngineError::Node(_)));
    assert_eq!(probe.calls(), 3);
    assert!(h.subjects().is_empty());
}

#[tokio::test]
async fn monitor_reports_a_certificate_for_another_host_as_invalid() {
    let probe = Arc::new(ScriptedProbe::failing(0));
    let h = monitor_harness(&probe);
    let mut graph = monitor_graph();
    graph.nodes[1] = Node::new("monitor", NodeType::MonitorCertificate)
        .with_config(json!({ "host": "10.0.0.1", "port": 8443, "domain": "other.test" }));

    h.run(graph).await;

    assert!(h.subjects()[0].starts_with("false "));
    let target = probe.targets.lock().unwrap()[0].clone();
    assert_eq!((target.host.as_str(), target.port), ("10.0.0.1", 8443));
}

#[tokio::test]
async fn monitor_stops_retrying_when_cancelled() {
    let cancel = CancellationToken::new();
    let mut scripted = ScriptedProbe::failing(usize::MAX);
    scripted.cancel = Some(cancel.clone());
    let probe = Arc::new(scripted);
    let probe_dyn: Arc<dyn CertificateProbe> = probe.clone();
    let h = Harness::with_services(move |services| {
        services
            .with_probe(probe_dyn)
            .with_monitor_retry_delay(Duration::from_secs(3600))
    });

    let result = h.try_run(monitor_graph(), cancel).await;

    assert_matches!(result, Err(EngineError::Cancelled));
    assert_eq!(probe.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn delay_is_interrupted_by_cancellation() {
    let h = Harness::new();
    let graph = WorkflowGraph::new(vec![
        Node::new("start", NodeType::Start),
        Node::new("wait", NodeType::Delay).with_config(json!({ "wait": 3600 })),
        Node::new("end", NodeType::End),
    ]);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = tokio::time::Instant::now();
    let result = h.try_run(graph, cancel).await;

    assert_matches!(result, Err(EngineError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn repeated_upload_is_skipped_and_stored_once() {
    let h = Harness::new();
    let certified = rcgen::generate_simple_self_signed(vec!["upload.example.com".to_string()]).unwrap();
    let cert_pem = certified.cert.pem();
    let key_pem = certified.key_pair.serialize_pem();

    h.run(upload_graph(&cert_pem, &key_pem)).await;
    h.run(upload_graph(&cert_pem, &key_pem)).await;

    assert_eq!(h.subjects(), vec!["skipped=false", "skipped=true"]);
    let certificates = h.store.all_certificates().await;
    assert_eq!(certificates.len(), 1);
    assert_eq!(certificates[0].subject_alt_names, "upload.example.com");
    assert_eq!(h.issued(), 0);
}

#[tokio::test]
async fn upload_rejects_malformed_material() {
    let h = Harness::new();
    let certified = rcgen::generate_simple_self_signed(vec!["upload.example.com".to_string()]).unwrap();
    let cert_pem = certified.cert.pem();
    let key_pem = certified.key_pair.serialize_pem();

    let bad_certificate = h
        .try_run(upload_graph("not a certificate", &key_pem), CancellationToken::new())
        .await;
    assert_matches!(bad_certificate, Err(EngineError::Node(_)));

    let bad_key = h
        .try_run(upload_graph(&cert_pem, "not a key"), CancellationToken::new())
        .await;
    assert_matches!(bad_key, Err(EngineError::Node(_)));

    assert!(h.subjects().is_empty());
    assert!(h.store.all_certificates().await.is_empty());
}
