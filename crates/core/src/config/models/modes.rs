use serde::{Deserialize, Serialize};

/// Textual names accepted for a pinned deployment mode.
pub const KNOWN_MODE_NAMES: [&str; 4] = [
    "local_only",
    "local_external",
    "local_object",
    "local_external_object",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModesConfig {
    pub pinned_mode: Option<String>,
    pub reconcile_interval_seconds: u64,
    pub availability_cache_ttl_seconds: u64,
    pub history_capacity: usize,
    pub auto_reconcile: bool,
    /// Process environment variable refreshed whenever a switch commits.
    /// Only for spawned child processes; unset it when other threads may
    /// read the environment at the same time.
    pub export_env_var: Option<String>,
}

impl Default for ModesConfig {
    fn default() -> Self {
        Self {
            pinned_mode: None,
            reconcile_interval_seconds: 60,
            availability_cache_ttl_seconds: 300,
            history_capacity: 100,
            auto_reconcile: true,
            export_env_var: Some("TIERING_DEPLOYMENT_MODE".to_string()),
        }
    }
}

impl ModesConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(pinned) = &self.pinned_mode {
            let normalized = pinned.trim().to_ascii_lowercase();
            if !KNOWN_MODE_NAMES.contains(&normalized.as_str()) {
                return Err(anyhow::anyhow!(
                    "无效的部署模式: {}，支持的模式: {:?}",
                    pinned,
                    KNOWN_MODE_NAMES
                ));
            }
        }

        if self.reconcile_interval_seconds == 0 {
            return Err(anyhow::anyhow!("模式巡检间隔必须大于0"));
        }

        if self.history_capacity == 0 {
            return Err(anyhow::anyhow!("切换历史容量必须大于0"));
        }

        Ok(())
    }
}
