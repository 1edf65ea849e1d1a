use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use db::models::{WorkflowLog, WorkflowRun, WorkflowTrigger};
use queue::{start_workflow_run, DispatcherStatistics};

use super::AppState;
use crate::ApiError;

#[derive(Debug, Default, Deserialize)]
pub struct StartRunDto {
    #[serde(default)]
    pub trigger: Option<WorkflowTrigger>,
}

pub async fn start(
    Path(workflow_id): Path<Uuid>,
    State(state): State<AppState>,
    payload: Option<Json<StartRunDto>>,
) -> Result<(StatusCode, Json<WorkflowRun>), ApiError> {
    let trigger = payload
        .and_then(|Json(dto)| dto.trigger)
        .unwrap_or(WorkflowTrigger::Manual);
    let run = start_workflow_run(&state.repos, &state.dispatcher, workflow_id, trigger).await?;
    Ok((StatusCode::ACCEPTED, Json(run)))
}

pub async fn get(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<WorkflowRun>, ApiError> {
    Ok(Json(state.repos.runs.get_by_id(id).await?))
}

pub async fn logs(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Vec<WorkflowLog>>, ApiError> {
    Ok(Json(state.repos.logs.list_by_run(id).await?))
}

pub async fn cancel(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    state.dispatcher.cancel(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn statistics(State(state): State<AppState>) -> Json<DispatcherStatistics> {
    Json(state.dispatcher.statistics().await)
}
