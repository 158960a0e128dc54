use serde::{Deserialize, Serialize};

/// Generation task queue and worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskQueueConfig {
    pub poll_interval_ms: u64,
    pub batch_size: u32,
    pub max_concurrency: usize,
    pub max_attempts: i32,
    pub base_delay_seconds: u64,
    pub max_delay_seconds: u64,
    pub jitter_factor: f64,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            batch_size: 10,
            max_concurrency: 4,
            max_attempts: 3,
            base_delay_seconds: 5,
            max_delay_seconds: 3600,
            jitter_factor: 0.1,
        }
    }
}

impl TaskQueueConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("任务轮询间隔必须大于0"));
        }

        if self.batch_size == 0 {
            return Err(anyhow::anyhow!("批量大小必须大于0"));
        }

        if self.max_concurrency == 0 {
            return Err(anyhow::anyhow!("最大并发数必须大于0"));
        }

        if self.max_attempts < 0 {
            return Err(anyhow::anyhow!("最大尝试次数不能为负数"));
        }

        if self.base_delay_seconds > self.max_delay_seconds {
            return Err(anyhow::anyhow!("基础重试间隔不能大于最大重试间隔"));
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(anyhow::anyhow!("抖动因子必须在0到1之间"));
        }

        Ok(())
    }
}

/// Outbox drain settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    pub drain_batch_size: u32,
    pub max_attempts: i32,
    pub default_drain_interval_seconds: u64,
    pub retention_hours: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            drain_batch_size: 100,
            max_attempts: 10,
            default_drain_interval_seconds: 30,
            retention_hours: 24,
        }
    }
}

impl OutboxConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.drain_batch_size == 0 {
            return Err(anyhow::anyhow!("发件箱批量大小必须大于0"));
        }
        if self.max_attempts <= 0 {
            return Err(anyhow::anyhow!("发件箱最大尝试次数必须大于0"));
        }
        if self.default_drain_interval_seconds == 0 {
            return Err(anyhow::anyhow!("发件箱排空间隔必须大于0"));
        }
        Ok(())
    }
}
