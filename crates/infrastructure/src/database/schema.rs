use sqlx::SqlitePool;
use tracing::debug;

use tiering_core::TieringResult;

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS app_settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at_ms INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS outbox_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_type TEXT NOT NULL,
        entity_type TEXT NOT NULL,
        entity_id TEXT,
        payload TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        enqueued_at_ms INTEGER NOT NULL,
        updated_at_ms INTEGER NOT NULL,
        sent_at_ms INTEGER
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_outbox_events_status_id ON outbox_events(status, id)",
    r#"
    CREATE TABLE IF NOT EXISTS generation_tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_id TEXT,
        task_type TEXT NOT NULL,
        payload TEXT NOT NULL DEFAULT '{}',
        status TEXT NOT NULL DEFAULT 'queued',
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        result TEXT,
        next_eligible_at_ms INTEGER NOT NULL,
        created_at_ms INTEGER NOT NULL,
        updated_at_ms INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_generation_tasks_eligible ON generation_tasks(status, next_eligible_at_ms)",
    "CREATE INDEX IF NOT EXISTS idx_generation_tasks_owner ON generation_tasks(owner_id)",
];

/// 运行数据库迁移
pub async fn run_migrations(pool: &SqlitePool) -> TieringResult<()> {
    debug!("Running SQLite schema migrations");
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
