//! `settings` table.

use async_trait::async_trait;

use super::SettingsRepository;
use crate::models::Setting;
use crate::{DbError, PgStore};

#[async_trait]
impl SettingsRepository for PgStore {
    async fn get_by_name(&self, name: &str) -> Result<Option<Setting>, DbError> {
        let row = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT content FROM settings WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|content| Setting {
            name: name.to_owned(),
            content,
        }))
    }

    async fn save(&self, setting: &Setting) -> Result<Setting, DbError> {
        sqlx::query(
            r#"
            INSERT INTO settings (name, content) VALUES ($1, $2)
            ON CONFLICT (name) DO UPDATE SET content = EXCLUDED.content
            "#,
        )
        .bind(&setting.name)
        .bind(&setting.content)
        .execute(&self.pool)
        .await?;

        Ok(setting.clone())
    }
}
