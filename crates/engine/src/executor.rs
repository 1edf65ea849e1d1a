//! Workflow execution engine.
//!
//! `WorkflowEngine` interprets one run's graph snapshot:
//! 1. Walks the top-level sibling list in order (`execute_blocks`).
//! 2. Dispatches each node through the `ExecutableNode` registered for its
//!    type (`execute_node`); containers recurse back through the engine.
//! 3. Merges node variables and outputs into the run's `StateStore` and
//!    persists outputs flagged for it.
//! 4. Fires lifecycle hooks and turns panics, cancellation and the
//!    termination sentinel into a single `Result`.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use db::graph::siblings;
use db::models::{WorkflowOutput, WorkflowTrigger};
use db::repository::WorkflowOutputRepository;
use db::{Node, NodeType, WorkflowGraph};
use nodes::{
    keys, BlockWalker, ExecutableNode, NodeContext, NodeError, NodeLogger, NodeServices,
    RunContext, Scope, StateStore, StateValue,
};

use crate::containers::container_executors;
use crate::hooks::{fire, Hooks, NodeErrorEvent, NodeEvent, NodeLogEvent, RunErrorEvent, RunEvent};
use crate::EngineError;

// ---------------------------------------------------------------------------
// Node registry
// ---------------------------------------------------------------------------

/// Maps node types to their executors.
pub type NodeRegistry = HashMap<NodeType, Arc<dyn ExecutableNode>>;

/// Containers plus every leaf executor.
pub fn standard_registry(services: &NodeServices) -> NodeRegistry {
    container_executors()
        .into_iter()
        .chain(nodes::standard_executors(services))
        .collect()
}

// ---------------------------------------------------------------------------
// Execution request
// ---------------------------------------------------------------------------

/// Everything the engine needs to run one graph.
#[derive(Debug, Clone)]
pub struct WorkflowExecution {
    pub workflow_id: Uuid,
    pub workflow_name: String,
    pub run_id: Uuid,
    pub trigger: WorkflowTrigger,
    pub graph: WorkflowGraph,
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Interpreter for one run.  Holds no per-run state; the `StateStore` is
/// created inside `invoke`.
pub struct WorkflowEngine {
    registry: NodeRegistry,
    outputs: Arc<dyn WorkflowOutputRepository>,
    hooks: Hooks,
}

impl WorkflowEngine {
    pub fn new(registry: NodeRegistry, outputs: Arc<dyn WorkflowOutputRepository>) -> Self {
        Self {
            registry,
            outputs,
            hooks: Hooks::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn hooks_mut(&mut self) -> &mut Hooks {
        &mut self.hooks
    }

    /// Run the graph to completion.
    ///
    /// Reaching an End node counts as success.  Cancellation surfaces as
    /// [`EngineError::Cancelled`]; a panic anywhere below is caught and
    /// returned as [`EngineError::Panicked`].
    #[instrument(skip_all, fields(workflow_id = %execution.workflow_id, run_id = %execution.run_id))]
    pub async fn invoke(
        &self,
        execution: WorkflowExecution,
        cancel: CancellationToken,
    ) -> Result<(), EngineError> {
        let run = RunContext {
            workflow_id: execution.workflow_id,
            workflow_name: execution.workflow_name,
            run_id: execution.run_id,
            trigger: execution.trigger,
            cancel,
            state: StateStore::new(),
        };
        let event = RunEvent::from(&run);
        fire("on_start", &self.hooks.on_start, &event).await;
        info!(nodes = execution.graph.nodes.len(), "workflow started");

        let walk = AssertUnwindSafe(self.execute_blocks(&run, &execution.graph.nodes))
            .catch_unwind()
            .await;

        let result = match walk {
            Ok(Ok(())) | Ok(Err(NodeError::Terminated)) => Ok(()),
            Ok(Err(err)) => Err(EngineError::from(err)),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    panic = %message,
                    backtrace = %std::backtrace::Backtrace::force_capture(),
                    "workflow panicked"
                );
                Err(EngineError::Panicked(message))
            }
        };

        match &result {
            Ok(()) => {
                info!("workflow finished");
                fire("on_end", &self.hooks.on_end, &event).await;
            }
            Err(err) => {
                error!(error = %err, "workflow failed");
                let failure = RunErrorEvent {
                    run: event,
                    error: err.to_string(),
                    cancelled: err.is_cancelled(),
                };
                fire("on_error", &self.hooks.on_error, &failure).await;
            }
        }
        result
    }

    async fn flush_logs(&self, event: &NodeEvent, logger: &NodeLogger) {
        let records = logger.drain();
        if records.is_empty() {
            return;
        }
        let logging = NodeLogEvent {
            node: event.clone(),
            records,
        };
        fire("on_node_logging", &self.hooks.on_node_logging, &logging).await;
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[async_trait]
impl BlockWalker for WorkflowEngine {
    async fn execute_blocks(&self, run: &RunContext, blocks: &[Node]) -> Result<(), NodeError> {
        let mut stashed = Vec::new();

        for node in siblings(blocks) {
            if run.cancel.is_cancelled() {
                return Err(NodeError::Cancelled);
            }
            match self.execute_node(run, node).await {
                Ok(()) => {}
                // A failed try/catch does not stop its siblings.
                Err(err) if node.node_type == NodeType::TryCatch && !matches!(err, NodeError::Terminated) => {
                    stashed.push(err);
                }
                Err(err) => return Err(err),
            }
        }

        match NodeError::join(stashed) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    #[instrument(skip_all, fields(node_id = %node.id, node_type = %node.node_type))]
    async fn execute_node(&self, run: &RunContext, node: &Node) -> Result<(), NodeError> {
        let executor = self
            .registry
            .get(&node.node_type)
            .ok_or_else(|| NodeError::Unregistered(node.node_type.to_string()))?;

        let scope = Scope::node(node.id.as_str());
        run.state.set(scope.clone(), keys::NODE_ID, node.id.as_str());
        run.state.set(scope.clone(), keys::NODE_NAME, node.name.as_str());

        if node.disabled {
            debug!("node disabled, skipped");
            return Ok(());
        }

        let event = NodeEvent::new(run, node);
        fire("on_node_start", &self.hooks.on_node_start, &event).await;

        let logger = NodeLogger::new(node.id.as_str());
        let ctx = NodeContext {
            run,
            node,
            walker: self,
            logger: &logger,
        };
        let result = executor.execute(&ctx).await;
        self.flush_logs(&event, &logger).await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                if !err.is_sentinel() {
                    let message = err.to_string();
                    run.state.record_error(&node.id, &node.name, &message);
                    let failure = NodeErrorEvent {
                        node: event,
                        error: message,
                    };
                    fire("on_node_error", &self.hooks.on_node_error, &failure).await;
                }
                return Err(err);
            }
        };

        fire("on_node_end", &self.hooks.on_node_end, &event).await;

        for variable in &outcome.variables {
            run.state
                .set(scope.clone(), variable.key.clone(), variable.value.clone());
        }
        for output in &outcome.outputs {
            run.state.set(
                scope.clone(),
                output.name.clone(),
                StateValue {
                    value: output.value.clone(),
                    value_type: output.value_type,
                },
            );
        }

        if outcome.needs_persisting() {
            let record = WorkflowOutput::succeeded(
                run.workflow_id,
                run.run_id,
                node.id.as_str(),
                node.config.clone(),
                outcome.outputs.clone(),
            );
            self.outputs.save(&record).await?;
        }

        if outcome.terminated {
            return Err(NodeError::Terminated);
        }
        Ok(())
    }
}
