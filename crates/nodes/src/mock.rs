//! `MockNode` — a test double for `ExecutableNode`.
//!
//! Registered in place of real executors by engine and dispatcher tests.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::traits::{ExecutableNode, NodeContext, NodeOutcome};
use crate::NodeError;

/// Behaviour injected into `MockNode` at construction time.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Return this outcome.
    Succeed(NodeOutcome),
    /// Fail with a `Failed` error.
    Fail(String),
    /// Behave like an End node.
    Terminate,
    /// Block until the run is cancelled.
    WaitForCancel,
    Panic(String),
}

/// A mock node that records the id of every node it executes.
pub struct MockNode {
    /// Label used in test assertions.
    pub name: String,
    pub behaviour: MockBehaviour,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl MockNode {
    pub fn new(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            calls: Arc::default(),
        }
    }

    pub fn succeeding(name: impl Into<String>) -> Self {
        Self::new(name, MockBehaviour::Succeed(NodeOutcome::new()))
    }

    pub fn returning(name: impl Into<String>, outcome: NodeOutcome) -> Self {
        Self::new(name, MockBehaviour::Succeed(outcome))
    }

    pub fn failing(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(name, MockBehaviour::Fail(msg.into()))
    }

    pub fn terminating(name: impl Into<String>) -> Self {
        Self::new(name, MockBehaviour::Terminate)
    }

    pub fn blocking(name: impl Into<String>) -> Self {
        Self::new(name, MockBehaviour::WaitForCancel)
    }

    pub fn panicking(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(name, MockBehaviour::Panic(msg.into()))
    }

    /// Number of times this node has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Ids of the executed nodes, in call order.
    pub fn called_nodes(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl ExecutableNode for MockNode {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ctx.node.id.clone());
        ctx.logger.debug(format!("mock '{}' executed", self.name));

        match &self.behaviour {
            MockBehaviour::Succeed(outcome) => Ok(outcome.clone()),
            MockBehaviour::Fail(msg) => Err(NodeError::failed(msg.clone())),
            MockBehaviour::Terminate => Ok(NodeOutcome::new().terminated()),
            MockBehaviour::WaitForCancel => {
                ctx.cancel().cancelled().await;
                Err(NodeError::Cancelled)
            }
            MockBehaviour::Panic(msg) => panic!("{msg}"),
        }
    }
}
