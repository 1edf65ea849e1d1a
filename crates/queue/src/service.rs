//! Run creation.

use tracing::{info, instrument};
use uuid::Uuid;

use db::models::{WorkflowRun, WorkflowTrigger};
use db::Repositories;
use engine::validate_graph;

use crate::{DispatchError, WorkflowDispatcher};

/// Snapshot the workflow's graph into a new pending run and queue it.
///
/// Refused while the workflow's most recent run is still pending or
/// processing.
#[instrument(skip(repos, dispatcher))]
pub async fn start_workflow_run(
    repos: &Repositories,
    dispatcher: &WorkflowDispatcher,
    workflow_id: Uuid,
    trigger: WorkflowTrigger,
) -> Result<WorkflowRun, DispatchError> {
    let workflow = repos.workflows.get_by_id(workflow_id).await?;
    if workflow.last_run_status.is_some_and(|s| s.is_active()) {
        return Err(DispatchError::WorkflowBusy(workflow_id));
    }
    validate_graph(&workflow.graph)?;

    let run = WorkflowRun::pending(&workflow, trigger);
    let run = repos.runs.save_with_cascading(&run).await?;
    dispatcher.start(run.id).await?;

    info!(run_id = %run.id, "workflow run created");
    Ok(run)
}
