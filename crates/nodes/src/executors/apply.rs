//! Certificate issuance through an ACME authority.

use std::time::Duration;

use acme::{ChallengeSolver, OrderRequest, ParsedCertificate};
use async_trait::async_trait;
use chrono::Utc;
use db::models::{CertificateSource, LogLevel, OutputEntry, ValueType, WorkflowOutput};
use serde_json::json;

use super::{certificate_outcome, certificate_record, CertificateMaterial};
use crate::config::ApplyConfig;
use crate::services::NodeServices;
use crate::skip::{decide_apply, SkipDecision};
use crate::state::keys;
use crate::traits::{ExecutableNode, NodeContext, NodeOutcome};
use crate::NodeError;

pub struct ApplyCertificateNode {
    services: NodeServices,
}

impl ApplyCertificateNode {
    pub fn new(services: NodeServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl ExecutableNode for ApplyCertificateNode {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let cfg: ApplyConfig = ctx.config()?;
        cfg.validate().map_err(NodeError::Config)?;

        let repos = &self.services.repos;
        let node_id = ctx.node.id.as_str();

        let last_output = repos
            .outputs
            .get_last_succeeded(ctx.run.workflow_id, node_id)
            .await?;
        let last_certificate = match &last_output {
            Some(output) => repos.certificates.get_by_run_node(output.run_id, node_id).await?,
            None => None,
        };

        let now = Utc::now();
        match decide_apply(&cfg, last_output.as_ref().zip(last_certificate.as_ref()), now) {
            SkipDecision::Skip(reason) => {
                if let Some(certificate) = &last_certificate {
                    ctx.logger.info(format!("skipping issuance: {reason}"));
                    return Ok(certificate_outcome(certificate, true, now));
                }
            }
            SkipDecision::Run(reason) => ctx.logger.info(format!("requesting certificate: {reason}")),
        }
        ctx.check_cancelled()?;

        let ca = cfg.ca_settings().resolve()?;
        let account = self
            .services
            .acme
            .acquire_account(&ca, &cfg.contact_email)
            .await?;
        ctx.logger.info(format!(
            "using {} account {}",
            ca.ca, account.account_url
        ));

        let provider = self.services.challenges.build(
            &cfg.provider,
            &cfg.provider_access_config,
            &cfg.provider_extended_config,
        )?;

        // The hint only makes sense for a certificate issued to this account.
        let replaces = if cfg.ari_replace {
            last_certificate
                .as_ref()
                .filter(|c| c.acme_account_url.as_deref() == Some(account.account_url.as_str()))
                .and_then(|c| c.ari_cert_id.clone())
        } else {
            None
        };

        let order = OrderRequest {
            identifiers: cfg.domains.clone(),
            solver: ChallengeSolver {
                challenge_type: cfg.challenge_type,
                provider,
                dns_propagation_wait: cfg.dns_propagation_wait.map(Duration::from_secs),
                dns_propagation_timeout: cfg.dns_propagation_timeout.map(Duration::from_secs),
                dns_nameservers: cfg.dns_nameservers.clone(),
                http_delay: cfg.http_delay.map(Duration::from_secs),
            },
            key_algorithm: cfg.key_algorithm,
            private_key_pem: cfg.private_key.clone().filter(|k| !k.trim().is_empty()),
            not_before: None,
            not_after: cfg
                .validity_days
                .map(|days| now + chrono::Duration::days(i64::from(days))),
            preferred_chain: cfg.preferred_chain.clone().filter(|c| !c.trim().is_empty()),
            replaces,
        };

        let issued = self
            .services
            .acme
            .obtain(&account, order, ctx.cancel())
            .await?;
        let parsed = ParsedCertificate::from_pem(&issued.certificate_pem)?;

        let mut certificate = certificate_record(
            ctx,
            CertificateMaterial {
                source: CertificateSource::Request,
                parsed: &parsed,
                chain_pem: issued.certificate_pem.clone(),
                private_key_pem: issued.private_key_pem.clone(),
                issuer_certificate_pem: issued.issuer_certificate_pem.clone(),
            },
        );
        certificate.acme_account_url = Some(account.account_url.clone());
        certificate.acme_cert_url = Some(issued.cert_url.clone()).filter(|u| !u.is_empty());

        let output = WorkflowOutput::succeeded(
            ctx.run.workflow_id,
            ctx.run.run_id,
            node_id,
            ctx.node.config.clone(),
            vec![OutputEntry::new(keys::CERTIFICATE, certificate.id.to_string(), ValueType::String)
                .persistent()],
        );
        let (_, certificate) = repos.outputs.save_with_certificate(&output, &certificate).await?;

        if issued.ari_replaced {
            if let Some(mut previous) = last_certificate {
                previous.is_renewed = true;
                previous.updated_at = Utc::now();
                repos.certificates.save(&previous).await?;
            }
        }

        ctx.logger.with_data(
            LogLevel::Info,
            "certificate issued",
            json!({
                "serialNumber": certificate.serial_number,
                "domains": certificate.subject_alt_names,
                "validTo": certificate.valid_to,
                "ariReplaced": issued.ari_replaced,
            }),
        );
        Ok(certificate_outcome(&certificate, false, Utc::now()))
    }
}
