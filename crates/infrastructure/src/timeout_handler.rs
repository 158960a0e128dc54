//! Timeout handling for calls that leave the process.

use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, instrument};

use tiering_core::{TieringError, TieringResult};

#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Writes against the external relational store
    pub external_store_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            external_store_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TimeoutHandler {
    config: TimeoutConfig,
}

impl TimeoutHandler {
    pub fn new(config: TimeoutConfig) -> Self {
        Self { config }
    }

    #[instrument(skip(self, operation))]
    pub async fn external_store_operation<F, T>(
        &self,
        operation: F,
        operation_name: &str,
    ) -> TieringResult<T>
    where
        F: Future<Output = TieringResult<T>>,
    {
        execute_with_timeout(
            operation,
            self.config.external_store_timeout,
            "外部存储",
            operation_name,
        )
        .await
    }
}

/// Timeouts become `ConnectionFailed`: the outcome is unknown, not negative.
pub async fn execute_with_timeout<F, T>(
    operation: F,
    timeout_duration: Duration,
    operation_type: &str,
    operation_name: &str,
) -> TieringResult<T>
where
    F: Future<Output = TieringResult<T>>,
{
    match timeout(timeout_duration, operation).await {
        Ok(result) => result,
        Err(_) => {
            let error_msg = format!(
                "{operation_type}操作 '{operation_name}' 超时 (超时时间: {timeout_duration:?})"
            );
            error!("{}", error_msg);
            Err(TieringError::ConnectionFailed(error_msg))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn fast_operation_passes_through() {
        let handler = TimeoutHandler::default();
        let result = handler
            .external_store_operation(async { Ok("ok") }, "upsert")
            .await;
        assert_eq!(result.unwrap(), "ok");
    }

    #[tokio::test]
    async fn slow_operation_is_connection_failed() {
        let handler = TimeoutHandler::new(TimeoutConfig {
            external_store_timeout: Duration::from_millis(10),
        });
        let result: TieringResult<()> = handler
            .external_store_operation(
                async {
                    sleep(Duration::from_millis(200)).await;
                    Ok(())
                },
                "upsert",
            )
            .await;
        assert!(matches!(result, Err(TieringError::ConnectionFailed(_))));
    }
}
