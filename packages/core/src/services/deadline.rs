//! Caller-supplied deadlines
//!
//! Dropping a store future releases its connection; libsql rolls back any
//! transaction still open on a connection when it closes, so a timed out
//! write leaves nothing behind.

use crate::services::ServiceError;
use std::future::Future;
use std::time::Duration;

/// Run `operation`, failing with [`ServiceError::Timeout`] once `deadline` elapses
pub async fn with_deadline<T, F>(deadline: Duration, operation: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    match tokio::time::timeout(deadline, operation).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(deadline_ms = deadline.as_millis() as u64, "Operation deadline elapsed");
            Err(ServiceError::Timeout {
                millis: deadline.as_millis(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_within_deadline() {
        let value = with_deadline(Duration::from_secs(1), async { Ok(5) })
            .await
            .unwrap();
        assert_eq!(value, 5);
    }

    #[tokio::test]
    async fn test_times_out() {
        let result: Result<(), ServiceError> = with_deadline(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ServiceError::Timeout { millis: 10 })));
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let result: Result<(), ServiceError> = with_deadline(Duration::from_secs(1), async {
            Err(ServiceError::validation("bad"))
        })
        .await;
        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }
}
