use serde::{Deserialize, Serialize};

/// Embedded SQLite store that every mode relies on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalStoreConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_seconds: u64,
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://tiering.db".to_string(),
            max_connections: 5,
            min_connections: 1,
            connection_timeout_seconds: 30,
        }
    }
}

impl LocalStoreConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.is_empty() {
            return Err(anyhow::anyhow!("本地存储URL不能为空"));
        }

        if !self.url.starts_with("sqlite:") {
            return Err(anyhow::anyhow!("本地存储URL必须是SQLite格式: {}", self.url));
        }

        if self.max_connections == 0 {
            return Err(anyhow::anyhow!("最大连接数必须大于0"));
        }

        if self.min_connections > self.max_connections {
            return Err(anyhow::anyhow!("最小连接数不能大于最大连接数"));
        }

        if self.connection_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("连接超时时间必须大于0"));
        }

        Ok(())
    }
}

/// Optional network relational store (Postgres).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalStoreConfig {
    pub url: Option<String>,
    pub disabled: bool,
    pub probe_timeout_seconds: u64,
}

impl Default for ExternalStoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            disabled: false,
            probe_timeout_seconds: 5,
        }
    }
}

impl ExternalStoreConfig {
    /// Configured URL, ignoring blank values.
    pub fn configured_url(&self) -> Option<&str> {
        self.url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// True when the URL points back at an embedded store instead of a server.
    pub fn points_to_embedded(url: &str) -> bool {
        let lower = url.to_ascii_lowercase();
        lower.starts_with("sqlite:")
            || lower.starts_with("file:")
            || (!lower.contains("://") && lower.ends_with(".db"))
    }

    /// Configuration-only check used when validating a pinned mode.
    pub fn is_usable(&self) -> bool {
        !self.disabled
            && self
                .configured_url()
                .is_some_and(|url| !Self::points_to_embedded(url))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.probe_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("外部存储探测超时必须大于0"));
        }
        Ok(())
    }
}

/// Optional S3-compatible object store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectStoreConfig {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint: Option<String>,
    pub bucket: Option<String>,
    pub region: String,
    pub probe_timeout_seconds: u64,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            access_key_id: None,
            secret_access_key: None,
            endpoint: None,
            bucket: None,
            region: "us-east-1".to_string(),
            probe_timeout_seconds: 5,
        }
    }
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

impl ObjectStoreConfig {
    /// All four of key id, secret, endpoint and bucket are set and non-blank.
    pub fn has_all_credentials(&self) -> bool {
        present(&self.access_key_id)
            && present(&self.secret_access_key)
            && present(&self.endpoint)
            && present(&self.bucket)
    }

    /// Names of the credential fields that are still missing.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        [
            ("access_key_id", &self.access_key_id),
            ("secret_access_key", &self.secret_access_key),
            ("endpoint", &self.endpoint),
            ("bucket", &self.bucket),
        ]
        .into_iter()
        .filter(|(_, value)| !present(value))
        .map(|(name, _)| name)
        .collect()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.region.is_empty() {
            return Err(anyhow::anyhow!("对象存储区域不能为空"));
        }
        if self.probe_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("对象存储探测超时必须大于0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_external_url_is_not_configured() {
        let config = ExternalStoreConfig {
            url: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(config.configured_url().is_none());
        assert!(!config.is_usable());
    }

    #[test]
    fn embedded_urls_are_recognised() {
        assert!(ExternalStoreConfig::points_to_embedded("sqlite://data/app.db"));
        assert!(ExternalStoreConfig::points_to_embedded("file:local.db"));
        assert!(!ExternalStoreConfig::points_to_embedded(
            "postgres://user:pw@db.internal:5432/app"
        ));
    }

    #[test]
    fn disabled_external_store_is_unusable() {
        let config = ExternalStoreConfig {
            url: Some("postgres://db/app".to_string()),
            disabled: true,
            ..Default::default()
        };
        assert!(!config.is_usable());
    }

    #[test]
    fn object_store_reports_missing_credentials() {
        let config = ObjectStoreConfig {
            access_key_id: Some("AKIA".to_string()),
            endpoint: Some("http://localhost:9000".to_string()),
            ..Default::default()
        };
        assert!(!config.has_all_credentials());
        assert_eq!(
            config.missing_credentials(),
            vec!["secret_access_key", "bucket"]
        );
    }
}
