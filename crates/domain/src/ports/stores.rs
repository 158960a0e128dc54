use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::entities::{FailureClassification, ObjectStoreCredentials};

/// How the relational probe opens its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectMode {
    /// Regular pooled client with prepared statements.
    Pooled,
    /// Single connection without statement caching; survives poolers that
    /// reject prepared statements.
    Plain,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("probe timed out")]
    Timeout,
    #[error("connection pooler incompatibility: {0}")]
    PoolerIncompatible(String),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("connection error: {0}")]
    Connection(String),
}

impl ProbeError {
    pub fn classification(&self) -> FailureClassification {
        match self {
            ProbeError::Timeout => FailureClassification::Timeout,
            ProbeError::PoolerIncompatible(_) => FailureClassification::PoolerIncompatible,
            ProbeError::Authentication(_) => FailureClassification::Authentication,
            ProbeError::Connection(_) => FailureClassification::Connection,
        }
    }
}

/// Opens a connection to the external relational store and runs a trivial
/// query.
#[async_trait]
pub trait ExternalStoreConnector: Send + Sync {
    async fn ping(&self, url: &str, mode: ConnectMode) -> Result<(), ProbeError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObjectStoreError {
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error("bucket not found: {0}")]
    BucketNotFound(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("object store error: {0}")]
    Other(String),
}

impl ObjectStoreError {
    pub fn classification(&self) -> FailureClassification {
        match self {
            ObjectStoreError::InvalidCredentials(_) => FailureClassification::InvalidCredentials,
            ObjectStoreError::BucketNotFound(_) => FailureClassification::BucketNotFound,
            ObjectStoreError::AccessDenied(_) => FailureClassification::AccessDenied,
            ObjectStoreError::Other(_) => FailureClassification::Other,
        }
    }
}

#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Lists at most `max_keys` object keys.
    async fn list_objects(&self, bucket: &str, max_keys: u32)
        -> Result<Vec<String>, ObjectStoreError>;
}

pub trait ObjectStoreClientFactory: Send + Sync {
    fn create(
        &self,
        credentials: &ObjectStoreCredentials,
    ) -> Result<Arc<dyn ObjectStoreClient>, ObjectStoreError>;
}
