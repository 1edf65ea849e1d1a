//! Lifecycle hooks.
//!
//! Each hook kind is an ordered list of async callbacks.  A failing callback
//! is logged and the remaining callbacks (and the walk) carry on.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::warn;
use uuid::Uuid;

use db::models::WorkflowTrigger;
use db::{Node, NodeType};
use nodes::{LogRecord, RunContext};

/// Identifies the run a hook fires for.
#[derive(Debug, Clone)]
pub struct RunEvent {
    pub workflow_id: Uuid,
    pub workflow_name: String,
    pub run_id: Uuid,
    pub trigger: WorkflowTrigger,
}

impl From<&RunContext> for RunEvent {
    fn from(run: &RunContext) -> Self {
        Self {
            workflow_id: run.workflow_id,
            workflow_name: run.workflow_name.clone(),
            run_id: run.run_id,
            trigger: run.trigger,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunErrorEvent {
    pub run: RunEvent,
    pub error: String,
    /// The run stopped because it was cancelled.
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
pub struct NodeEvent {
    pub run: RunEvent,
    pub node_id: String,
    pub node_name: String,
    pub node_type: NodeType,
}

impl NodeEvent {
    pub fn new(run: &RunContext, node: &Node) -> Self {
        Self {
            run: RunEvent::from(run),
            node_id: node.id.clone(),
            node_name: node.name.clone(),
            node_type: node.node_type,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeErrorEvent {
    pub node: NodeEvent,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct NodeLogEvent {
    pub node: NodeEvent,
    pub records: Vec<LogRecord>,
}

pub type Hook<E> = Arc<dyn Fn(E) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

fn boxed<E, F, Fut>(f: F) -> Hook<E>
where
    F: Fn(E) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

pub(crate) async fn fire<E: Clone>(kind: &'static str, hooks: &[Hook<E>], event: &E) {
    for hook in hooks {
        if let Err(err) = hook(event.clone()).await {
            warn!(hook = kind, error = %err, "hook callback failed");
        }
    }
}

#[derive(Clone, Default)]
pub struct Hooks {
    pub(crate) on_start: Vec<Hook<RunEvent>>,
    pub(crate) on_end: Vec<Hook<RunEvent>>,
    pub(crate) on_error: Vec<Hook<RunErrorEvent>>,
    pub(crate) on_node_start: Vec<Hook<NodeEvent>>,
    pub(crate) on_node_end: Vec<Hook<NodeEvent>>,
    pub(crate) on_node_error: Vec<Hook<NodeErrorEvent>>,
    pub(crate) on_node_logging: Vec<Hook<NodeLogEvent>>,
}

macro_rules! hook_registrar {
    ($($name:ident: $event:ty),* $(,)?) => {
        $(
            pub fn $name<F, Fut>(&mut self, f: F) -> &mut Self
            where
                F: Fn($event) -> Fut + Send + Sync + 'static,
                Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
            {
                self.$name.push(boxed(f));
                self
            }
        )*
    };
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    hook_registrar! {
        on_start: RunEvent,
        on_end: RunEvent,
        on_error: RunErrorEvent,
        on_node_start: NodeEvent,
        on_node_end: NodeEvent,
        on_node_error: NodeErrorEvent,
        on_node_logging: NodeLogEvent,
    }
}
