//! `workflow_outputs` table.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::certificates::upsert_certificate;
use super::WorkflowOutputRepository;
use crate::models::{Certificate, WorkflowOutput};
use crate::{DbError, PgStore};

async fn insert_output(
    tx: &mut Transaction<'_, Postgres>,
    output: &WorkflowOutput,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO workflow_outputs (id, workflow_id, run_id, node_id, succeeded, data, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (id) DO UPDATE
        SET succeeded = EXCLUDED.succeeded,
            data = EXCLUDED.data
        "#,
    )
    .bind(output.id)
    .bind(output.workflow_id)
    .bind(output.run_id)
    .bind(&output.node_id)
    .bind(output.succeeded)
    .bind(Json(output))
    .bind(output.created_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[async_trait]
impl WorkflowOutputRepository for PgStore {
    async fn save(&self, output: &WorkflowOutput) -> Result<WorkflowOutput, DbError> {
        let mut tx = self.pool.begin().await?;
        insert_output(&mut tx, output).await?;
        tx.commit().await?;
        Ok(output.clone())
    }

    async fn save_with_certificate(
        &self,
        output: &WorkflowOutput,
        certificate: &Certificate,
    ) -> Result<(WorkflowOutput, Certificate), DbError> {
        let mut tx = self.pool.begin().await?;
        upsert_certificate(&mut tx, certificate).await?;
        insert_output(&mut tx, output).await?;
        tx.commit().await?;
        Ok((output.clone(), certificate.clone()))
    }

    async fn get_last_succeeded(
        &self,
        workflow_id: Uuid,
        node_id: &str,
    ) -> Result<Option<WorkflowOutput>, DbError> {
        let row = sqlx::query_scalar::<_, Json<WorkflowOutput>>(
            r#"
            SELECT data FROM workflow_outputs
            WHERE workflow_id = $1 AND node_id = $2 AND succeeded
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(workflow_id)
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.0))
    }

    async fn get_by_run_node(
        &self,
        run_id: Uuid,
        node_id: &str,
    ) -> Result<Option<WorkflowOutput>, DbError> {
        let row = sqlx::query_scalar::<_, Json<WorkflowOutput>>(
            r#"
            SELECT data FROM workflow_outputs
            WHERE run_id = $1 AND node_id = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(run_id)
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.0))
    }
}
