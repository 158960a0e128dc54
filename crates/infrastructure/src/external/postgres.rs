use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPoolOptions};
use sqlx::{ConnectOptions, Connection, Executor};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument};

use tiering_domain::ports::{ConnectMode, ExternalStoreConnector, ProbeError};

/// Message fragments that indicate a transaction-pooling proxy rejected the
/// pooled client's prepared statements or startup parameters.
const POOLER_PATTERNS: [&str; 5] = [
    "prepared statement",
    "pgbouncer",
    "unsupported startup parameter",
    "protocol",
    "unnamed portal",
];

/// Pure classification of a driver error message.
pub fn classify_pg_message(message: &str) -> ProbeError {
    let lower = message.to_ascii_lowercase();
    if POOLER_PATTERNS.iter().any(|p| lower.contains(p)) {
        ProbeError::PoolerIncompatible(message.to_string())
    } else if lower.contains("password authentication failed")
        || lower.contains("authentication")
        || lower.contains("no pg_hba.conf entry")
    {
        ProbeError::Authentication(message.to_string())
    } else {
        ProbeError::Connection(message.to_string())
    }
}

pub fn classify_pg_error(err: sqlx::Error) -> ProbeError {
    match &err {
        sqlx::Error::PoolTimedOut => ProbeError::Timeout,
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("28P01") | Some("28000") => ProbeError::Authentication(db.message().to_string()),
            // prepared statement does not exist / already exists
            Some("26000") | Some("42P05") => ProbeError::PoolerIncompatible(db.message().to_string()),
            _ => classify_pg_message(db.message()),
        },
        sqlx::Error::Protocol(message) => ProbeError::PoolerIncompatible(message.clone()),
        other => classify_pg_message(&other.to_string()),
    }
}

/// Probes the external Postgres store with `SELECT 1`.
#[derive(Debug, Clone)]
pub struct PgExternalStoreConnector {
    acquire_timeout: Duration,
}

impl PgExternalStoreConnector {
    pub fn new(acquire_timeout: Duration) -> Self {
        Self { acquire_timeout }
    }

    async fn ping_pooled(&self, url: &str) -> Result<(), ProbeError> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(self.acquire_timeout)
            .connect(url)
            .await
            .map_err(classify_pg_error)?;

        let outcome = sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map(|_| ())
            .map_err(classify_pg_error);
        pool.close().await;
        outcome
    }

    async fn ping_plain(&self, url: &str) -> Result<(), ProbeError> {
        let options = PgConnectOptions::from_str(url)
            .map_err(classify_pg_error)?
            .statement_cache_capacity(0)
            .disable_statement_logging();

        let mut conn = PgConnection::connect_with(&options)
            .await
            .map_err(classify_pg_error)?;

        // simple query protocol, nothing is prepared
        let outcome = (&mut conn)
            .execute("SELECT 1")
            .await
            .map(|_| ())
            .map_err(classify_pg_error);
        let _ = conn.close().await;
        outcome
    }
}

impl Default for PgExternalStoreConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl ExternalStoreConnector for PgExternalStoreConnector {
    #[instrument(skip(self, url))]
    async fn ping(&self, url: &str, mode: ConnectMode) -> Result<(), ProbeError> {
        debug!("Pinging external store ({:?})", mode);
        match mode {
            ConnectMode::Pooled => self.ping_pooled(url).await,
            ConnectMode::Plain => self.ping_plain(url).await,
        }
    }
}
