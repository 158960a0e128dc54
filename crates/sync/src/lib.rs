//! Outbox-based replication: enqueue on the write path, drain in the
//! background.

pub mod drainer;
pub mod normalize;
pub mod replicator;

pub use drainer::{DrainReport, DrainerSettings, OutboxDrainer, OutboxFlushHook};
pub use normalize::{normalize_payload, StorageReference};
pub use replicator::OutboxReplicator;
