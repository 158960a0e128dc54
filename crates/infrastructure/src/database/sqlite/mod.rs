pub mod generation_task_repository;
pub mod outbox_repository;
pub mod settings_store;
pub mod unit_of_work;

pub use generation_task_repository::SqliteGenerationTaskRepository;
pub use outbox_repository::SqliteOutboxRepository;
pub use settings_store::SqliteSettingsStore;
pub use unit_of_work::SqliteUnitOfWork;
