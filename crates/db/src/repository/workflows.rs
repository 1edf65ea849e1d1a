//! `workflows` table.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use uuid::Uuid;

use super::WorkflowRepository;
use crate::models::{RunStatus, Workflow, WorkflowTrigger};
use crate::{DbError, PgStore};

#[async_trait]
impl WorkflowRepository for PgStore {
    async fn get_by_id(&self, id: Uuid) -> Result<Workflow, DbError> {
        let row = sqlx::query_scalar::<_, Json<Workflow>>("SELECT data FROM workflows WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("workflow", id))?;

        Ok(row.0)
    }

    async fn save(&self, workflow: &Workflow) -> Result<Workflow, DbError> {
        let mut workflow = workflow.clone();
        workflow.updated_at = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO workflows (id, enabled, trigger, last_run_status, data, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
            SET enabled = EXCLUDED.enabled,
                trigger = EXCLUDED.trigger,
                last_run_status = EXCLUDED.last_run_status,
                data = EXCLUDED.data,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(workflow.id)
        .bind(workflow.enabled)
        .bind(workflow.trigger.to_string())
        .bind(workflow.last_run_status.map(RunStatus::as_str))
        .bind(Json(&workflow))
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(workflow)
    }

    async fn list(&self) -> Result<Vec<Workflow>, DbError> {
        let rows = sqlx::query_scalar::<_, Json<Workflow>>(
            "SELECT data FROM workflows ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn list_enabled_scheduled(&self) -> Result<Vec<Workflow>, DbError> {
        let rows = sqlx::query_scalar::<_, Json<Workflow>>(
            "SELECT data FROM workflows WHERE enabled AND trigger = $1 ORDER BY created_at",
        )
        .bind(WorkflowTrigger::Scheduled.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn list_by_last_run_status(
        &self,
        statuses: &[RunStatus],
    ) -> Result<Vec<Workflow>, DbError> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.to_string()).collect();
        let rows = sqlx::query_scalar::<_, Json<Workflow>>(
            "SELECT data FROM workflows WHERE last_run_status = ANY($1)",
        )
        .bind(statuses)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }
}
