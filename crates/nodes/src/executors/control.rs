//! Start, End and Delay.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::DelayConfig;
use crate::traits::{ExecutableNode, NodeContext, NodeOutcome};
use crate::NodeError;

pub struct StartNode;

#[async_trait]
impl ExecutableNode for StartNode {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        ctx.logger.info(format!(
            "workflow '{}' started by {} trigger",
            ctx.run.workflow_name,
            ctx.run.trigger
        ));
        Ok(NodeOutcome::new())
    }
}

/// Ends the run successfully, even from inside a container.
pub struct EndNode;

#[async_trait]
impl ExecutableNode for EndNode {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        ctx.logger.info("end reached");
        Ok(NodeOutcome::new().terminated())
    }
}

pub struct DelayNode;

#[async_trait]
impl ExecutableNode for DelayNode {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let cfg: DelayConfig = ctx.config()?;
        if cfg.wait > 0 {
            ctx.logger.info(format!("waiting {}s", cfg.wait));
            ctx.sleep(Duration::from_secs(cfg.wait)).await?;
        }
        Ok(NodeOutcome::new())
    }
}
