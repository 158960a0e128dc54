pub mod postgres;
pub mod replication;

pub use postgres::{classify_pg_error, classify_pg_message, PgExternalStoreConnector};
pub use replication::PgReplicationSink;
