pub mod database;
pub mod external;
pub mod object_store;
pub mod timeout_handler;

pub use database::{
    LocalDatabase, SqliteGenerationTaskRepository, SqliteOutboxRepository, SqliteSettingsStore,
    SqliteUnitOfWork,
};
pub use external::{PgExternalStoreConnector, PgReplicationSink};
pub use object_store::{S3ClientFactory, S3ListClient};
pub use timeout_handler::{TimeoutConfig, TimeoutHandler};
