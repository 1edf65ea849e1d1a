//! Pushes a certificate produced earlier in the workflow to a target.

use async_trait::async_trait;
use db::models::{LogLevel, OutputEntry, ValueType};
use serde_json::Value;

use crate::config::DeployConfig;
use crate::services::NodeServices;
use crate::skip::{decide_deploy, SkipDecision};
use crate::state::keys;
use crate::traits::{ExecutableNode, NodeContext, NodeOutcome};
use crate::NodeError;

pub struct DeployCertificateNode {
    services: NodeServices,
}

impl DeployCertificateNode {
    pub fn new(services: NodeServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl ExecutableNode for DeployCertificateNode {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let cfg: DeployConfig = ctx.config()?;
        let source = cfg.source_node_id();
        if source.is_empty() {
            return Err(NodeError::Config("certificate source node is required".into()));
        }

        let repos = &self.services.repos;
        let certificate = repos
            .certificates
            .get_latest_by_workflow_node(ctx.run.workflow_id, source)
            .await?
            .ok_or_else(|| {
                NodeError::failed(format!("node '{source}' has not produced a certificate"))
            })?;
        let reference = OutputEntry::new(keys::CERTIFICATE, certificate.id.to_string(), ValueType::String);

        let last_output = repos
            .outputs
            .get_last_succeeded(ctx.run.workflow_id, &ctx.node.id)
            .await?;
        match decide_deploy(&cfg, last_output.as_ref(), &certificate) {
            SkipDecision::Skip(reason) => {
                ctx.logger.info(format!("skipping deployment: {reason}"));
                return Ok(NodeOutcome::new().skipped(true).output(reference));
            }
            SkipDecision::Run(reason) => ctx.logger.info(format!("deploying: {reason}")),
        }

        let deployer = self.services.deployers.build(
            &cfg.provider,
            &cfg.provider_access_config,
            &cfg.provider_config,
        )?;
        let result = ctx
            .until_cancelled(deployer.deploy(
                ctx.cancel(),
                &certificate.certificate,
                &certificate.private_key,
            ))
            .await?;

        ctx.logger.with_data(
            LogLevel::Info,
            format!(
                "certificate {} deployed via '{}'",
                certificate.serial_number, cfg.provider
            ),
            Value::Object(result),
        );
        Ok(NodeOutcome::new().skipped(false).output(reference).forced())
    }
}
