//! Dispatcher-level error type.

use thiserror::Error;
use uuid::Uuid;

use db::models::RunStatus;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatcher already booted")]
    AlreadyBooted,

    #[error("dispatcher is not booted")]
    NotBooted,

    #[error("dispatcher already shut down")]
    AlreadyShutdown,

    #[error("run {0} is already queued")]
    AlreadyQueued(Uuid),

    #[error("run {0} is already processing")]
    AlreadyProcessing(Uuid),

    #[error("run {run_id} is already {status}")]
    AlreadyTerminal { run_id: Uuid, status: RunStatus },

    /// The workflow already has a pending or processing run.
    #[error("workflow {0} already has an active run")]
    WorkflowBusy(Uuid),

    #[error("invalid workflow graph: {0}")]
    InvalidGraph(#[from] engine::EngineError),

    #[error("invalid cron expression '{expression}': {message}")]
    InvalidCron { expression: String, message: String },

    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}

impl DispatchError {
    /// Errors caused by the request rather than the system.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::AlreadyQueued(_)
                | Self::AlreadyProcessing(_)
                | Self::AlreadyTerminal { .. }
                | Self::WorkflowBusy(_)
        )
    }
}
