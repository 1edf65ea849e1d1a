//! `acme_accounts` table.

use async_trait::async_trait;
use sqlx::types::Json;

use super::AcmeAccountRepository;
use crate::models::AcmeAccount;
use crate::{DbError, PgStore};

#[async_trait]
impl AcmeAccountRepository for PgStore {
    async fn get_by_ca_and_email(
        &self,
        ca: &str,
        directory_url: &str,
        email: &str,
    ) -> Result<Option<AcmeAccount>, DbError> {
        let row = sqlx::query_scalar::<_, Json<AcmeAccount>>(
            r#"
            SELECT data FROM acme_accounts
            WHERE ca = $1 AND directory_url = $2 AND email = $3
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(ca)
        .bind(directory_url)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.0))
    }

    async fn get_by_account_url(&self, account_url: &str) -> Result<Option<AcmeAccount>, DbError> {
        let row = sqlx::query_scalar::<_, Json<AcmeAccount>>(
            "SELECT data FROM acme_accounts WHERE account_url = $1 LIMIT 1",
        )
        .bind(account_url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.0))
    }

    async fn save(&self, account: &AcmeAccount) -> Result<AcmeAccount, DbError> {
        sqlx::query(
            r#"
            INSERT INTO acme_accounts (id, ca, directory_url, email, account_url, data, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
            SET account_url = EXCLUDED.account_url,
                data = EXCLUDED.data
            "#,
        )
        .bind(account.id)
        .bind(&account.ca)
        .bind(&account.directory_url)
        .bind(&account.email)
        .bind(&account.account_url)
        .bind(Json(account))
        .bind(account.created_at)
        .execute(&self.pool)
        .await?;

        Ok(account.clone())
    }
}
