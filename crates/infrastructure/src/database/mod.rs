pub mod mapping;
pub mod schema;
pub mod sqlite;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, instrument};

use tiering_core::config::LocalStoreConfig;
use tiering_core::TieringResult;

pub use sqlite::{
    SqliteGenerationTaskRepository, SqliteOutboxRepository, SqliteSettingsStore,
    SqliteUnitOfWork,
};

/// The embedded store every mode relies on.
#[derive(Clone)]
pub struct LocalDatabase {
    pool: SqlitePool,
}

impl LocalDatabase {
    /// Opens (creating if missing) the SQLite file and applies the schema.
    #[instrument(skip(config), fields(url = %config.url))]
    pub async fn connect(config: &LocalStoreConfig) -> TieringResult<Self> {
        // 创建连接选项，启用WAL模式
        let connect_options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect_with(connect_options)
            .await?;

        let database = Self { pool };
        database.migrate().await?;
        info!("Local store ready");
        Ok(database)
    }

    /// Single-connection in-memory database, mostly for tests.
    pub async fn in_memory() -> TieringResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let database = Self { pool };
        database.migrate().await?;
        Ok(database)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> TieringResult<()> {
        schema::run_migrations(&self.pool).await
    }

    pub async fn health_check(&self) -> TieringResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Starts a write transaction shared by business code and the outbox.
    pub async fn begin(&self) -> TieringResult<SqliteUnitOfWork> {
        let tx = self.pool.begin().await?;
        debug!("Opened local unit of work");
        Ok(SqliteUnitOfWork::new(tx))
    }

    pub fn settings_store(&self) -> SqliteSettingsStore {
        SqliteSettingsStore::new(self.pool.clone())
    }

    pub fn outbox_repository(&self) -> SqliteOutboxRepository {
        SqliteOutboxRepository::new(self.pool.clone())
    }

    pub fn generation_task_repository(&self) -> SqliteGenerationTaskRepository {
        SqliteGenerationTaskRepository::new(self.pool.clone())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
