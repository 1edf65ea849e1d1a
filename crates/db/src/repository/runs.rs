//! `workflow_runs` table.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::WorkflowRunRepository;
use crate::models::{RunFilter, RunStatus, Workflow, WorkflowRun};
use crate::{DbError, PgStore};

async fn upsert_run(
    tx: &mut Transaction<'_, Postgres>,
    run: &WorkflowRun,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO workflow_runs (id, workflow_id, status, ended_at, data, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (id) DO UPDATE
        SET status = EXCLUDED.status,
            ended_at = EXCLUDED.ended_at,
            data = EXCLUDED.data
        "#,
    )
    .bind(run.id)
    .bind(run.workflow_id)
    .bind(run.status.as_str())
    .bind(run.ended_at)
    .bind(Json(run))
    .bind(run.created_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[async_trait]
impl WorkflowRunRepository for PgStore {
    async fn get_by_id(&self, id: Uuid) -> Result<WorkflowRun, DbError> {
        let row = sqlx::query_scalar::<_, Json<WorkflowRun>>(
            "SELECT data FROM workflow_runs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::not_found("workflow run", id))?;

        Ok(row.0)
    }

    async fn save(&self, run: &WorkflowRun) -> Result<WorkflowRun, DbError> {
        let mut tx = self.pool.begin().await?;
        upsert_run(&mut tx, run).await?;
        tx.commit().await?;
        Ok(run.clone())
    }

    async fn save_with_cascading(&self, run: &WorkflowRun) -> Result<WorkflowRun, DbError> {
        let mut tx = self.pool.begin().await?;
        upsert_run(&mut tx, run).await?;

        let workflow = sqlx::query_scalar::<_, Json<Workflow>>(
            "SELECT data FROM workflows WHERE id = $1 FOR UPDATE",
        )
        .bind(run.workflow_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(Json(mut workflow)) = workflow {
            if workflow.apply_run(run) {
                sqlx::query(
                    "UPDATE workflows SET last_run_status = $1, data = $2, updated_at = $3 WHERE id = $4",
                )
                .bind(run.status.as_str())
                .bind(Json(&workflow))
                .bind(workflow.updated_at)
                .bind(workflow.id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(run.clone())
    }

    async fn list_by_status(&self, statuses: &[RunStatus]) -> Result<Vec<WorkflowRun>, DbError> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.to_string()).collect();
        let rows = sqlx::query_scalar::<_, Json<WorkflowRun>>(
            "SELECT data FROM workflow_runs WHERE status = ANY($1) ORDER BY created_at",
        )
        .bind(statuses)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn delete_where(&self, filter: &RunFilter) -> Result<u64, DbError> {
        let statuses: Vec<String> = filter.statuses.iter().map(|s| s.to_string()).collect();
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query_scalar::<_, Uuid>(
            r#"
            DELETE FROM workflow_runs
            WHERE ($1::uuid IS NULL OR workflow_id = $1)
              AND ($2::timestamptz IS NULL OR ended_at < $2)
              AND (cardinality($3::text[]) = 0 OR status = ANY($3))
              AND NOT (id = ANY($4::uuid[]))
            RETURNING id
            "#,
        )
        .bind(filter.workflow_id)
        .bind(filter.ended_before)
        .bind(statuses)
        .bind(filter.exclude_ids.as_slice())
        .fetch_all(&mut *tx)
        .await?;

        if !deleted.is_empty() {
            sqlx::query("DELETE FROM workflow_logs WHERE run_id = ANY($1)")
                .bind(deleted.as_slice())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(deleted.len() as u64)
    }
}
