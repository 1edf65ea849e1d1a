//! Container nodes: they own child blocks and hand them back to the engine
//! through the [`BlockWalker`](nodes::BlockWalker).
//!
//! Children always run sequentially, including the branches of a condition.

use std::sync::Arc;

use async_trait::async_trait;
use db::{graph::siblings, NodeType};
use nodes::config::BranchConfig;
use nodes::{ExecutableNode, NodeContext, NodeError, NodeOutcome};

/// Runs every branch in order; each branch decides for itself.
pub struct ConditionNode;

#[async_trait]
impl ExecutableNode for ConditionNode {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        for branch in siblings(&ctx.node.blocks) {
            ctx.check_cancelled()?;
            ctx.walker.execute_node(ctx.run, branch).await?;
        }
        Ok(NodeOutcome::new())
    }
}

/// Enters its children when its expression holds, or when it has none.
pub struct BranchBlockNode;

#[async_trait]
impl ExecutableNode for BranchBlockNode {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let cfg: BranchConfig = ctx.config()?;
        let enter = match &cfg.expression {
            Some(expr) => expr.eval_bool(ctx.state())?,
            None => true,
        };
        if !enter {
            ctx.logger.info("branch condition not met");
            return Ok(NodeOutcome::new());
        }

        ctx.walker
            .execute_blocks(ctx.run, &ctx.node.blocks)
            .await
            .map_err(NodeError::into_blocks)?;
        Ok(NodeOutcome::new())
    }
}

/// Runs all try blocks; if any failed, runs all catch blocks.  Errors from
/// both phases are returned together.
pub struct TryCatchNode;

#[async_trait]
impl ExecutableNode for TryCatchNode {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let children = siblings(&ctx.node.blocks);
        let tries = children.iter().filter(|n| n.node_type == NodeType::TryBlock);
        let catches = children.iter().filter(|n| n.node_type == NodeType::CatchBlock);

        let mut errors = Vec::new();
        for block in tries {
            ctx.check_cancelled()?;
            match ctx.walker.execute_node(ctx.run, block).await {
                Ok(()) => {}
                Err(NodeError::Terminated) => return Err(NodeError::Terminated),
                Err(err) => errors.push(err),
            }
        }

        if !errors.is_empty() {
            ctx.logger
                .warn(format!("try failed with {} error(s), running catch blocks", errors.len()));
            for block in catches {
                ctx.check_cancelled()?;
                match ctx.walker.execute_node(ctx.run, block).await {
                    Ok(()) => {}
                    Err(NodeError::Terminated) => return Err(NodeError::Terminated),
                    Err(err) => errors.push(err),
                }
            }
        }

        match NodeError::join(errors) {
            Some(err) => Err(err.into_blocks()),
            None => Ok(NodeOutcome::new()),
        }
    }
}

/// TryBlock and CatchBlock: walk the children.
pub struct BlockListNode;

#[async_trait]
impl ExecutableNode for BlockListNode {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        ctx.walker
            .execute_blocks(ctx.run, &ctx.node.blocks)
            .await
            .map_err(NodeError::into_blocks)?;
        Ok(NodeOutcome::new())
    }
}

pub fn container_executors() -> Vec<(NodeType, Arc<dyn ExecutableNode>)> {
    vec![
        (NodeType::Condition, Arc::new(ConditionNode)),
        (NodeType::BranchBlock, Arc::new(BranchBlockNode)),
        (NodeType::TryCatch, Arc::new(TryCatchNode)),
        (NodeType::TryBlock, Arc::new(BlockListNode)),
        (NodeType::CatchBlock, Arc::new(BlockListNode)),
    ]
}
