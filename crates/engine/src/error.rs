//! Engine-level error types.

use nodes::NodeError;
use thiserror::Error;

/// Errors produced by the workflow engine (validation + execution).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Validation errors ------

    #[error("workflow graph is empty")]
    EmptyGraph,

    /// A node without an id.
    #[error("node of type '{0}' has no id")]
    MissingNodeId(String),

    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    #[error("the first node must be a start node, found '{0}'")]
    StartNotFirst(String),

    /// A container holds a child of the wrong kind, or a block node sits
    /// outside its container.
    #[error("node '{node_id}': {message}")]
    InvalidStructure { node_id: String, message: String },

    /// A deploy node points at a node that does not produce a certificate
    /// earlier in the graph.
    #[error("node '{node_id}' references '{reference}', which is not an earlier certificate node")]
    UnresolvedReference { node_id: String, reference: String },

    #[error("node '{node_id}' has an invalid config: {message}")]
    InvalidConfig { node_id: String, message: String },

    // ------ Execution errors ------

    /// The run's cancellation signal fired.
    #[error("workflow run cancelled")]
    Cancelled,

    /// A node failed and nothing recovered it.
    #[error(transparent)]
    Node(NodeError),

    /// A panic was caught at the invoke boundary.
    #[error("workflow panicked: {0}")]
    Panicked(String),

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}

impl EngineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyGraph
                | Self::MissingNodeId(_)
                | Self::DuplicateNodeId(_)
                | Self::StartNotFirst(_)
                | Self::InvalidStructure { .. }
                | Self::UnresolvedReference { .. }
                | Self::InvalidConfig { .. }
        )
    }
}

impl From<NodeError> for EngineError {
    fn from(err: NodeError) -> Self {
        if err.is_cancelled() {
            Self::Cancelled
        } else {
            Self::Node(err)
        }
    }
}
