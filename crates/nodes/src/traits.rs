//! The `ExecutableNode` trait — the contract every node executor fulfils —
//! and the contexts it runs with.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use db::models::{OutputEntry, WorkflowTrigger};
use db::Node;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::logger::NodeLogger;
use crate::state::{keys, StateStore, StateValue, Variable};
use crate::NodeError;

/// Shared by every node of one run.
///
/// Defined here (in the nodes crate) so both the engine and individual node
/// implementations can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub workflow_id: Uuid,
    pub workflow_name: String,
    pub run_id: Uuid,
    pub trigger: WorkflowTrigger,
    pub cancel: CancellationToken,
    pub state: StateStore,
}

/// Lets container nodes hand their children back to the engine.
#[async_trait]
pub trait BlockWalker: Send + Sync {
    /// Walk a sibling list in order.
    async fn execute_blocks(&self, run: &RunContext, blocks: &[Node]) -> Result<(), NodeError>;

    /// Execute a single node.
    async fn execute_node(&self, run: &RunContext, node: &Node) -> Result<(), NodeError>;
}

/// What one executor invocation sees.
pub struct NodeContext<'a> {
    pub run: &'a RunContext,
    pub node: &'a Node,
    pub walker: &'a dyn BlockWalker,
    pub logger: &'a NodeLogger,
}

impl<'a> NodeContext<'a> {
    pub fn state(&self) -> &StateStore {
        &self.run.state
    }

    pub fn cancel(&self) -> &CancellationToken {
        &self.run.cancel
    }

    pub fn check_cancelled(&self) -> Result<(), NodeError> {
        if self.run.cancel.is_cancelled() {
            Err(NodeError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep that ends early with `Cancelled` when the run is cancelled.
    pub async fn sleep(&self, duration: Duration) -> Result<(), NodeError> {
        tokio::select! {
            _ = self.run.cancel.cancelled() => Err(NodeError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Race `work` against the run's cancellation signal.
    pub async fn until_cancelled<T, F>(&self, work: F) -> Result<T, NodeError>
    where
        F: Future<Output = Result<T, NodeError>>,
    {
        tokio::select! {
            biased;
            _ = self.run.cancel.cancelled() => Err(NodeError::Cancelled),
            result = work => result,
        }
    }

    /// Decode the node's configuration.
    pub fn config<T: serde::de::DeserializeOwned>(&self) -> Result<T, NodeError> {
        self.node
            .config_as()
            .map_err(|e| NodeError::Config(format!("node '{}': {e}", self.node.id)))
    }
}

/// Result of a successful execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOutcome {
    /// Merged into the state store under the node's scope.
    pub variables: Vec<Variable>,
    /// Merged into the state store; persistent entries are stored as a
    /// `WorkflowOutput`.
    pub outputs: Vec<OutputEntry>,
    /// Store a `WorkflowOutput` even without persistent entries.
    pub force_output: bool,
    /// Stop the whole run successfully after this node.
    pub terminated: bool,
}

impl NodeOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn variable(mut self, key: impl Into<String>, value: impl Into<StateValue>) -> Self {
        self.variables.push(Variable {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn skipped(self, skipped: bool) -> Self {
        self.variable(keys::SKIPPED, skipped)
    }

    pub fn output(mut self, entry: OutputEntry) -> Self {
        self.outputs.push(entry);
        self
    }

    pub fn forced(mut self) -> Self {
        self.force_output = true;
        self
    }

    pub fn terminated(mut self) -> Self {
        self.terminated = true;
        self
    }

    pub fn needs_persisting(&self) -> bool {
        self.force_output || self.outputs.iter().any(|o| o.persistent)
    }
}

/// The core node trait.
///
/// Executors are stateless strategies keyed by node type; everything about
/// the current node and run arrives through the context.
#[async_trait]
pub trait ExecutableNode: Send + Sync {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError>;
}
