use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use tiering_domain::ports::TaskExecutor;

/// Executors keyed by the task type they handle.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: RwLock<HashMap<String, Arc<dyn TaskExecutor>>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any executor already registered for the same task type.
    pub async fn register(&self, executor: Arc<dyn TaskExecutor>) {
        let task_type = executor.task_type().to_string();
        info!("注册任务执行器: {}", task_type);
        self.executors.write().await.insert(task_type, executor);
    }

    pub async fn get(&self, task_type: &str) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.read().await.get(task_type).cloned()
    }

    pub async fn contains(&self, task_type: &str) -> bool {
        self.executors.read().await.contains_key(task_type)
    }

    pub async fn unregister(&self, task_type: &str) -> bool {
        self.executors.write().await.remove(task_type).is_some()
    }

    pub async fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.executors.read().await.keys().cloned().collect();
        types.sort();
        types
    }

    pub async fn is_empty(&self) -> bool {
        self.executors.read().await.is_empty()
    }
}
