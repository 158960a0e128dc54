pub mod app_config;
pub mod background;
pub mod modes;
pub mod observability;
pub mod stores;

pub use app_config::AppConfig;
pub use background::{OutboxConfig, TaskQueueConfig};
pub use modes::{ModesConfig, KNOWN_MODE_NAMES};
pub use observability::ObservabilityConfig;
pub use stores::{ExternalStoreConfig, LocalStoreConfig, ObjectStoreConfig};
