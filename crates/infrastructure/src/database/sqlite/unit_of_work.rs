use async_trait::async_trait;
use sqlx::{Sqlite, SqliteConnection, Transaction};
use tracing::debug;

use tiering_core::TieringResult;
use tiering_domain::entities::NewOutboxEntry;
use tiering_domain::repositories::UnitOfWork;

use super::outbox_repository::insert_outbox;

/// Open SQLite transaction. Business writes go through [`connection`] so they
/// commit or roll back together with the staged outbox rows.
///
/// [`connection`]: SqliteUnitOfWork::connection
pub struct SqliteUnitOfWork {
    tx: Transaction<'static, Sqlite>,
    staged: usize,
}

impl SqliteUnitOfWork {
    pub fn new(tx: Transaction<'static, Sqlite>) -> Self {
        Self { tx, staged: 0 }
    }

    pub fn connection(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    pub fn staged_entries(&self) -> usize {
        self.staged
    }
}

#[async_trait]
impl UnitOfWork for SqliteUnitOfWork {
    async fn stage_outbox(&mut self, entry: &NewOutboxEntry) -> TieringResult<i64> {
        let id = insert_outbox(&mut *self.tx, entry).await?;
        self.staged += 1;
        Ok(id)
    }

    async fn commit(self: Box<Self>) -> TieringResult<()> {
        let staged = self.staged;
        self.tx.commit().await?;
        debug!("Committed unit of work with {} outbox entries", staged);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> TieringResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
