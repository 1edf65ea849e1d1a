use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use db::models::{Workflow, WorkflowTrigger};
use db::WorkflowGraph;
use engine::validate_graph;
use queue::JobInfo;

use super::AppState;
use crate::ApiError;

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Workflow>>, ApiError> {
    Ok(Json(state.repos.workflows.list().await?))
}

pub async fn get(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Workflow>, ApiError> {
    Ok(Json(state.repos.workflows.get_by_id(id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveWorkflowDto {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub trigger: WorkflowTrigger,
    #[serde(default)]
    pub trigger_cron: Option<String>,
    pub graph: WorkflowGraph,
}

fn enabled_by_default() -> bool {
    true
}

/// Create or replace a workflow.  The graph is validated first and the
/// cron job is kept in step with the trigger.  Last-run fields belong to
/// the dispatcher and survive the update.
pub async fn save(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(dto): Json<SaveWorkflowDto>,
) -> Result<Json<Workflow>, ApiError> {
    validate_graph(&dto.graph)?;

    let mut workflow = match state.repos.workflows.get_by_id(id).await {
        Ok(existing) => existing,
        Err(e) if e.is_not_found() => {
            let mut created = Workflow::new(dto.name.clone(), dto.trigger, dto.graph.clone());
            created.id = id;
            created
        }
        Err(e) => return Err(e.into()),
    };
    workflow.name = dto.name;
    workflow.description = dto.description;
    workflow.enabled = dto.enabled;
    workflow.trigger = dto.trigger;
    workflow.trigger_cron = dto.trigger_cron;
    workflow.graph = dto.graph;
    workflow.updated_at = Utc::now();

    if workflow.is_scheduled() {
        if let Some(expression) = workflow.trigger_cron.as_deref() {
            queue::scheduler::parse_cron(expression)?;
        }
    }

    let saved = state.repos.workflows.save(&workflow).await?;
    state.scheduler.sync_workflow(&saved)?;
    Ok(Json(saved))
}

pub async fn schedules(State(state): State<AppState>) -> Json<Vec<JobInfo>> {
    Json(state.scheduler.scheduler().list_jobs())
}
