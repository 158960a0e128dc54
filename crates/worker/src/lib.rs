pub mod backoff;
pub mod queue;
pub mod registry;
pub mod worker;

pub use backoff::BackoffPolicy;
pub use queue::{FailureDisposition, GenerationTaskQueue};
pub use registry::ExecutorRegistry;
pub use worker::{GenerationWorker, PollReport, WorkerSettings};
