//! Sends a templated message through a notifier.

use async_trait::async_trait;

use crate::config::NotifyConfig;
use crate::services::NodeServices;
use crate::template;
use crate::traits::{ExecutableNode, NodeContext, NodeOutcome};
use crate::NodeError;

pub struct NotifyNode {
    services: NodeServices,
}

impl NotifyNode {
    pub fn new(services: NodeServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl ExecutableNode for NotifyNode {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let cfg: NotifyConfig = ctx.config()?;
        if cfg.skip_on_all_prev_skipped && ctx.state().all_recorded_skipped() {
            ctx.logger.info("every previous node skipped, not notifying");
            return Ok(NodeOutcome::new());
        }

        let subject = template::render(&cfg.subject, ctx.state());
        let message = template::render(&cfg.message, ctx.state());
        let notifier = self.services.notifiers.build(
            &cfg.provider,
            &cfg.provider_access_config,
            &cfg.provider_config,
        )?;
        ctx.until_cancelled(notifier.notify(ctx.cancel(), &subject, &message))
            .await?;

        ctx.logger.info(format!("notification '{subject}' sent via '{}'", cfg.provider));
        Ok(NodeOutcome::new())
    }
}
