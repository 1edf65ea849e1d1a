//! Registers a user-supplied certificate and key.

use async_trait::async_trait;
use chrono::Utc;
use db::models::{CertificateSource, OutputEntry, ValueType, WorkflowOutput};

use super::{certificate_outcome, certificate_record, CertificateMaterial};
use crate::config::UploadConfig;
use crate::services::NodeServices;
use crate::skip::{decide_upload, SkipDecision};
use crate::state::keys;
use crate::traits::{ExecutableNode, NodeContext, NodeOutcome};
use crate::NodeError;

pub struct UploadCertificateNode {
    services: NodeServices,
}

impl UploadCertificateNode {
    pub fn new(services: NodeServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl ExecutableNode for UploadCertificateNode {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let cfg: UploadConfig = ctx.config()?;
        if cfg.certificate.trim().is_empty() || cfg.private_key.trim().is_empty() {
            return Err(NodeError::Config(
                "certificate and private key are required".into(),
            ));
        }

        let repos = &self.services.repos;
        let node_id = ctx.node.id.as_str();
        let last_output = repos
            .outputs
            .get_last_succeeded(ctx.run.workflow_id, node_id)
            .await?;

        match decide_upload(&cfg, last_output.as_ref()) {
            SkipDecision::Skip(reason) => {
                let previous = match &last_output {
                    Some(output) => repos.certificates.get_by_run_node(output.run_id, node_id).await?,
                    None => None,
                };
                // The record may have been pruned by retention; upload again then.
                if let Some(certificate) = previous {
                    ctx.logger.info(format!("skipping upload: {reason}"));
                    return Ok(certificate_outcome(&certificate, true, Utc::now()));
                }
            }
            SkipDecision::Run(reason) => ctx.logger.info(format!("uploading certificate: {reason}")),
        }

        let parsed = acme::ParsedCertificate::from_pem(&cfg.certificate)?;
        rcgen::KeyPair::from_pem(cfg.private_key.trim())
            .map_err(|e| NodeError::Config(format!("invalid private key: {e}")))?;

        let chain = acme::certs::split_pem_chain(&cfg.certificate);
        let issuer_certificate_pem: String = chain.iter().skip(1).map(String::as_str).collect();

        let certificate = certificate_record(
            ctx,
            CertificateMaterial {
                source: CertificateSource::Upload,
                parsed: &parsed,
                chain_pem: cfg.certificate.trim().to_string(),
                private_key_pem: cfg.private_key.trim().to_string(),
                issuer_certificate_pem,
            },
        );
        let output = WorkflowOutput::succeeded(
            ctx.run.workflow_id,
            ctx.run.run_id,
            node_id,
            ctx.node.config.clone(),
            vec![OutputEntry::new(keys::CERTIFICATE, certificate.id.to_string(), ValueType::String)
                .persistent()],
        );
        let (_, certificate) = repos.outputs.save_with_certificate(&output, &certificate).await?;

        ctx.logger.info(format!(
            "certificate {} for {} stored",
            certificate.serial_number, certificate.subject_alt_names
        ));
        Ok(certificate_outcome(&certificate, false, Utc::now()))
    }
}
