use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use tiering_infrastructure::LocalDatabase;

/// Fresh single-connection `sqlite::memory:` store with the schema applied.
pub async fn memory_database() -> LocalDatabase {
    LocalDatabase::in_memory()
        .await
        .expect("in-memory SQLite store")
}

/// Polls `condition` every 10ms until it holds or `limit` passes.
pub async fn wait_until<F, Fut>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + limit;
    loop {
        if condition().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(10)).await;
    }
}
