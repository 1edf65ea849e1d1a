//! Executors for the leaf node types.
//!
//! Container nodes (condition, branches, try/catch) walk child blocks and
//! live in the engine crate.

use std::sync::Arc;

use acme::ParsedCertificate;
use chrono::{DateTime, Utc};
use db::models::{Certificate, CertificateSource, OutputEntry, ValueType};
use db::NodeType;
use uuid::Uuid;

use crate::services::NodeServices;
use crate::state::keys;
use crate::traits::{NodeContext, NodeOutcome};
use crate::ExecutableNode;

pub mod apply;
pub mod control;
pub mod deploy;
pub mod monitor;
pub mod notify;
pub mod upload;

pub use apply::ApplyCertificateNode;
pub use control::{DelayNode, EndNode, StartNode};
pub use deploy::DeployCertificateNode;
pub use monitor::MonitorCertificateNode;
pub use notify::NotifyNode;
pub use upload::UploadCertificateNode;

/// Every leaf executor, keyed by the node type it handles.
pub fn standard_executors(services: &NodeServices) -> Vec<(NodeType, Arc<dyn ExecutableNode>)> {
    vec![
        (NodeType::Start, Arc::new(StartNode)),
        (NodeType::End, Arc::new(EndNode)),
        (NodeType::Delay, Arc::new(DelayNode)),
        (
            NodeType::ApplyCertificate,
            Arc::new(ApplyCertificateNode::new(services.clone())),
        ),
        (
            NodeType::UploadCertificate,
            Arc::new(UploadCertificateNode::new(services.clone())),
        ),
        (
            NodeType::MonitorCertificate,
            Arc::new(MonitorCertificateNode::new(services.clone())),
        ),
        (
            NodeType::DeployCertificate,
            Arc::new(DeployCertificateNode::new(services.clone())),
        ),
        (NodeType::Notify, Arc::new(NotifyNode::new(services.clone()))),
    ]
}

/// Fields shared by issued and uploaded certificate records.
pub(crate) struct CertificateMaterial<'a> {
    pub source: CertificateSource,
    pub parsed: &'a ParsedCertificate,
    pub chain_pem: String,
    pub private_key_pem: String,
    pub issuer_certificate_pem: String,
}

pub(crate) fn certificate_record(ctx: &NodeContext<'_>, material: CertificateMaterial<'_>) -> Certificate {
    let now = Utc::now();
    let parsed = material.parsed;
    Certificate {
        id: Uuid::new_v4(),
        source: material.source,
        subject_alt_names: parsed.subject_alt_names.join(";"),
        serial_number: parsed.serial_number.clone(),
        certificate: material.chain_pem,
        private_key: material.private_key_pem,
        issuer_org: parsed.issuer_org.clone(),
        issuer_certificate: material.issuer_certificate_pem,
        key_algorithm: parsed.key_algorithm.clone(),
        valid_from: parsed.valid_from,
        valid_to: parsed.valid_to,
        acme_account_url: None,
        acme_cert_url: None,
        ari_cert_id: parsed.ari_cert_id.clone(),
        is_renewed: false,
        is_revoked: false,
        workflow_id: ctx.run.workflow_id,
        run_id: ctx.run.run_id,
        node_id: ctx.node.id.clone(),
        created_at: now,
        updated_at: now,
    }
}

/// Variables and the (non-persistent) certificate reference every
/// certificate-producing node exposes.
pub(crate) fn certificate_outcome(
    certificate: &Certificate,
    skipped: bool,
    now: DateTime<Utc>,
) -> NodeOutcome {
    let valid = certificate.valid_from <= now && now <= certificate.valid_to;
    NodeOutcome::new()
        .skipped(skipped)
        .variable(keys::CERTIFICATE_VALIDITY, valid)
        .variable(keys::CERTIFICATE_DAYS_LEFT, certificate.days_left(now))
        .output(OutputEntry::new(
            keys::CERTIFICATE,
            certificate.id.to_string(),
            ValueType::String,
        ))
}
