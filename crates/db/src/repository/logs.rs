//! `workflow_logs` table.

use async_trait::async_trait;
use sqlx::types::Json;
use uuid::Uuid;

use super::WorkflowLogRepository;
use crate::models::WorkflowLog;
use crate::{DbError, PgStore};

#[async_trait]
impl WorkflowLogRepository for PgStore {
    async fn save(&self, log: &WorkflowLog) -> Result<WorkflowLog, DbError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_logs (id, workflow_id, run_id, node_id, data, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(log.id)
        .bind(log.workflow_id)
        .bind(log.run_id)
        .bind(&log.node_id)
        .bind(Json(log))
        .bind(log.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(log.clone())
    }

    async fn list_by_run(&self, run_id: Uuid) -> Result<Vec<WorkflowLog>, DbError> {
        let rows = sqlx::query_scalar::<_, Json<WorkflowLog>>(
            "SELECT data FROM workflow_logs WHERE run_id = $1 ORDER BY created_at",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }
}
