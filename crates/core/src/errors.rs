use thiserror::Error;

/// Error taxonomy shared by every tiering crate.
///
/// Some variants are classifications rather than faults (`ConfigMissing`,
/// `ClaimConflict`); they still travel through `Result` so callers can match
/// on them explicitly.
#[derive(Debug, Error)]
pub enum TieringError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("required configuration missing: {0}")]
    ConfigMissing(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("transition rejected: {reason}")]
    TransitionRejected { reason: String },

    #[error("migration {from} -> {to} failed: {message}")]
    MigrationFailed {
        from: String,
        to: String,
        message: String,
    },

    #[error("post-switch action {action} failed: {message}")]
    PostActionFailed { action: String, message: String },

    #[error("task {task_id} already claimed by another worker")]
    ClaimConflict { task_id: i64 },

    #[error("task {task_id} exhausted its retry budget after {attempts} attempts")]
    MaxAttemptsExceeded { task_id: i64, attempts: i32 },

    #[error("generation task not found: {id}")]
    TaskNotFound { id: i64 },

    #[error("task execution error: {0}")]
    TaskExecution(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TieringError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        TieringError::TransitionRejected {
            reason: reason.into(),
        }
    }

    /// Classifications that are expected outcomes of normal operation.
    pub fn is_classification(&self) -> bool {
        matches!(
            self,
            TieringError::ConfigMissing(_) | TieringError::ClaimConflict { .. }
        )
    }
}

impl From<serde_json::Error> for TieringError {
    fn from(e: serde_json::Error) -> Self {
        TieringError::Serialization(e.to_string())
    }
}

/// 统一的Result类型
pub type TieringResult<T> = std::result::Result<T, TieringError>;
