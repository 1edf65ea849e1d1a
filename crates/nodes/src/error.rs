//! Node-level error type.

use thiserror::Error;

/// Errors returned by a node's `execute` method.
///
/// Two variants are control-flow sentinels rather than failures:
/// - `Terminated`      — an End node was reached; unwinds every level and is
///                       treated as success by the engine.
/// - `BlocksException` — one or more child nodes of a container failed; the
///                       children already reported themselves.
#[derive(Debug, Error, Clone)]
pub enum NodeError {
    #[error("workflow terminated")]
    Terminated,

    #[error("{}", join_messages(.0))]
    BlocksException(Vec<NodeError>),

    /// The run's cancellation signal fired.
    #[error("run cancelled")]
    Cancelled,

    #[error("invalid node config: {0}")]
    Config(String),

    #[error("no executor registered for node type '{0}'")]
    Unregistered(String),

    #[error("acme: {0}")]
    Acme(acme::AcmeError),

    #[error("storage: {0}")]
    Storage(String),

    #[error("{0}")]
    Failed(String),
}

fn join_messages(errors: &[NodeError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl NodeError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// Sentinels are not reported as node failures.
    pub fn is_sentinel(&self) -> bool {
        matches!(self, Self::Terminated | Self::BlocksException(_))
    }

    /// Whether cancellation caused this error, directly or inside a container.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Acme(e) => e.is_cancelled(),
            Self::BlocksException(errors) => errors.iter().any(NodeError::is_cancelled),
            _ => false,
        }
    }

    /// Join the errors collected while walking a sibling list.
    ///
    /// `Terminated` wins over everything, then `Cancelled`; the rest are
    /// flattened into one `BlocksException`.
    pub fn join(errors: Vec<NodeError>) -> Option<NodeError> {
        if errors.is_empty() {
            return None;
        }
        if errors.iter().any(|e| matches!(e, Self::Terminated)) {
            return Some(Self::Terminated);
        }
        if errors.iter().any(NodeError::is_cancelled) {
            return Some(Self::Cancelled);
        }

        let mut flat = Vec::with_capacity(errors.len());
        for err in errors {
            match err {
                Self::BlocksException(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        Some(Self::BlocksException(flat))
    }

    /// Wrap a child error for a container node.  Sentinels pass through.
    pub fn into_blocks(self) -> Self {
        match self {
            Self::Terminated | Self::Cancelled | Self::BlocksException(_) => self,
            Self::Acme(ref e) if e.is_cancelled() => Self::Cancelled,
            other => Self::BlocksException(vec![other]),
        }
    }
}

impl From<acme::AcmeError> for NodeError {
    fn from(err: acme::AcmeError) -> Self {
        if err.is_cancelled() {
            Self::Cancelled
        } else {
            Self::Acme(err)
        }
    }
}

impl From<db::DbError> for NodeError {
    fn from(err: db::DbError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}
