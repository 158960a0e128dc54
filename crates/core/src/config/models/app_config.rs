use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    background::{OutboxConfig, TaskQueueConfig},
    modes::ModesConfig,
    observability::ObservabilityConfig,
    stores::{ExternalStoreConfig, LocalStoreConfig, ObjectStoreConfig},
};

/// Default search locations when no explicit config path is given.
pub const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/tiering.toml",
    "tiering.toml",
    "/etc/tiering/config.toml",
];

/// Top-level configuration of the tiering daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub local_store: LocalStoreConfig,
    pub external_store: ExternalStoreConfig,
    pub object_store: ObjectStoreConfig,
    pub modes: ModesConfig,
    pub task_queue: TaskQueueConfig,
    pub outbox: OutboxConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Struct defaults (every section is `#[serde(default)]`)
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (`TIERING_<SECTION>__<KEY>`)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("TIERING")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// Structural validation only. Absent backend credentials are not an error.
    pub fn validate(&self) -> Result<()> {
        self.local_store.validate().context("本地存储配置验证失败")?;

        self.external_store
            .validate()
            .context("外部存储配置验证失败")?;

        self.object_store
            .validate()
            .context("对象存储配置验证失败")?;

        self.modes.validate().context("部署模式配置验证失败")?;

        self.task_queue.validate().context("任务队列配置验证失败")?;

        self.outbox.validate().context("发件箱配置验证失败")?;

        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        Ok(())
    }
}
