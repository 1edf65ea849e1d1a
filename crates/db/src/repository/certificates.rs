//! `certificates` table.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::CertificateRepository;
use crate::models::{Certificate, CertificateFilter};
use crate::{DbError, PgStore};

pub(crate) async fn upsert_certificate(
    tx: &mut Transaction<'_, Postgres>,
    certificate: &Certificate,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO certificates (id, workflow_id, run_id, node_id, valid_to, data, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (id) DO UPDATE
        SET valid_to = EXCLUDED.valid_to,
            data = EXCLUDED.data
        "#,
    )
    .bind(certificate.id)
    .bind(certificate.workflow_id)
    .bind(certificate.run_id)
    .bind(&certificate.node_id)
    .bind(certificate.valid_to)
    .bind(Json(certificate))
    .bind(certificate.created_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[async_trait]
impl CertificateRepository for PgStore {
    async fn get_by_id(&self, id: Uuid) -> Result<Certificate, DbError> {
        let row = sqlx::query_scalar::<_, Json<Certificate>>(
            "SELECT data FROM certificates WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::not_found("certificate", id))?;

        Ok(row.0)
    }

    async fn get_by_run_node(
        &self,
        run_id: Uuid,
        node_id: &str,
    ) -> Result<Option<Certificate>, DbError> {
        let row = sqlx::query_scalar::<_, Json<Certificate>>(
            r#"
            SELECT data FROM certificates
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

    async fn get_latest_by_workflow_node(
        &self,
        workflow_id: Uuid,
        node_id: &str,
    ) -> Result<Option<Certificate>, DbError> {
        let row = sqlx::query_scalar::<_, Json<Certificate>>(
            r#"
            SELECT data FROM certificates
            WHERE workflow_id = $1 AND node_id = $2
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

    async fn save(&self, certificate: &Certificate) -> Result<Certificate, DbError> {
        let mut certificate = certificate.clone();
        certificate.updated_at = Utc::now();

        let mut tx = self.pool.begin().await?;
        upsert_certificate(&mut tx, &certificate).await?;
        tx.commit().await?;
        Ok(certificate)
    }

    async fn delete_where(&self, filter: &CertificateFilter) -> Result<u64, DbError> {
        let result = sqlx::query(
            "DELETE FROM certificates WHERE ($1::timestamptz IS NULL OR valid_to < $1)",
        )
        .bind(filter.expired_before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
