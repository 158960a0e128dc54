//! 值对象
//!
//! Immutable enums shared by the mode manager, the policy table and the
//! replication path.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The four operating modes. Exactly one is active process-wide.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentMode {
    #[default]
    LocalOnly,
    LocalExternal,
    LocalObject,
    LocalExternalObject,
}

impl DeploymentMode {
    pub const ALL: [DeploymentMode; 4] = [
        DeploymentMode::LocalOnly,
        DeploymentMode::LocalExternal,
        DeploymentMode::LocalObject,
        DeploymentMode::LocalExternalObject,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentMode::LocalOnly => "local_only",
            DeploymentMode::LocalExternal => "local_external",
            DeploymentMode::LocalObject => "local_object",
            DeploymentMode::LocalExternalObject => "local_external_object",
        }
    }

    pub fn has_external(&self) -> bool {
        matches!(
            self,
            DeploymentMode::LocalExternal | DeploymentMode::LocalExternalObject
        )
    }

    pub fn has_object(&self) -> bool {
        matches!(
            self,
            DeploymentMode::LocalObject | DeploymentMode::LocalExternalObject
        )
    }

    /// Truth table from backend availability to mode; both true picks the
    /// most capable mode.
    pub fn from_capabilities(has_external: bool, has_object: bool) -> Self {
        match (has_external, has_object) {
            (false, false) => DeploymentMode::LocalOnly,
            (true, false) => DeploymentMode::LocalExternal,
            (false, true) => DeploymentMode::LocalObject,
            (true, true) => DeploymentMode::LocalExternalObject,
        }
    }

    /// Same mode with the object store removed.
    pub fn without_object(&self) -> Self {
        Self::from_capabilities(self.has_external(), false)
    }

    pub fn backends(&self) -> Vec<Backend> {
        let mut backends = Vec::new();
        if self.has_external() {
            backends.push(Backend::ExternalStore);
        }
        if self.has_object() {
            backends.push(Backend::ObjectStore);
        }
        backends
    }

    /// Compact encoding for lock-free snapshots.
    pub fn to_u8(self) -> u8 {
        match self {
            DeploymentMode::LocalOnly => 0,
            DeploymentMode::LocalExternal => 1,
            DeploymentMode::LocalObject => 2,
            DeploymentMode::LocalExternalObject => 3,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(DeploymentMode::LocalOnly),
            1 => Some(DeploymentMode::LocalExternal),
            2 => Some(DeploymentMode::LocalObject),
            3 => Some(DeploymentMode::LocalExternalObject),
            _ => None,
        }
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown deployment mode: {0}")]
pub struct ParseModeError(pub String);

impl FromStr for DeploymentMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "local_only" => Ok(DeploymentMode::LocalOnly),
            "local_external" => Ok(DeploymentMode::LocalExternal),
            "local_object" => Ok(DeploymentMode::LocalObject),
            "local_external_object" => Ok(DeploymentMode::LocalExternalObject),
            _ => Err(ParseModeError(s.to_string())),
        }
    }
}

/// Optional remote backends probed by the availability detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    ExternalStore,
    ObjectStore,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::ExternalStore => "external_store",
            Backend::ObjectStore => "object_store",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionKind {
    Upgrade,
    Downgrade,
    Migration,
    Maintenance,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::Upgrade => "upgrade",
            TransitionKind::Downgrade => "downgrade",
            TransitionKind::Migration => "migration",
            TransitionKind::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(from, to)` pair used to key strategies and migration routines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransitionKey {
    pub from: DeploymentMode,
    pub to: DeploymentMode,
}

impl TransitionKey {
    pub fn new(from: DeploymentMode, to: DeploymentMode) -> Self {
        Self { from, to }
    }
}

impl fmt::Display for TransitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    ToExternal,
    FromExternal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategyKind {
    FullDuplex,
    BackupOnly,
    MasterSlave,
    Disabled,
}

/// Which remote store a directive treats as its primary replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTarget {
    ExternalStore,
    ObjectStore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityCategory {
    /// Settings, identities and credentials.
    Critical,
    CoreBusiness,
    /// Large blobs such as generated images.
    BulkContent,
}
