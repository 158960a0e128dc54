use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, instrument};

use tiering_core::TieringResult;
use tiering_domain::repositories::SettingsStore;

use crate::database::mapping::MappingHelpers;

pub struct SqliteSettingsStore {
    pool: SqlitePool,
}

impl SqliteSettingsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsStore for SqliteSettingsStore {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> TieringResult<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM app_settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    #[instrument(skip(self, value))]
    async fn set(&self, key: &str, value: &str) -> TieringResult<()> {
        sqlx::query(
            r#"
            INSERT INTO app_settings (key, value, updated_at_ms)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at_ms = excluded.updated_at_ms
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(MappingHelpers::to_millis(Utc::now()))
        .execute(&self.pool)
        .await?;
        debug!("Persisted setting {}", key);
        Ok(())
    }

    async fn health_check(&self) -> TieringResult<bool> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(true)
    }
}
