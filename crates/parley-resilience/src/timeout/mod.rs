//! Timeout wrapper for async operations.

use parley_core::ParleyError;
use std::time::Duration;

/// Wraps an async operation with a timeout.
///
/// The future is dropped on expiry; nothing is retried.
pub async fn with_timeout<F, Fut, T>(duration: Duration, f: F) -> Result<T, ParleyError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, ParleyError>>,
{
    tokio::time::timeout(duration, f())
        .await
        .map_err(|_| ParleyError::Timeout(format!("Operation timed out after {:?}", duration)))?
}

/// Like [`with_timeout`], naming the operation in the error.
pub async fn with_named_timeout<F, Fut, T>(
    operation: &str,
    duration: Duration,
    f: F,
) -> Result<T, ParleyError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, ParleyError>>,
{
    tokio::time::timeout(duration, f())
        .await
        .map_err(|_| ParleyError::Timeout(format!("{} timed out after {:?}", operation, duration)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_success() {
        let result = with_timeout(Duration::from_secs(1), || async { Ok::<_, ParleyError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_exceeded() {
        let result = with_timeout(Duration::from_millis(10), || async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, ParleyError>(42)
        })
        .await;

        assert!(matches!(result, Err(ParleyError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let result = with_timeout(Duration::from_secs(1), || async {
            Err::<i32, _>(ParleyError::store("deadlock"))
        })
        .await;

        assert!(matches!(result, Err(ParleyError::Store(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_named_timeout_message() {
        let result = with_named_timeout("cache get", Duration::from_millis(5), || async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, ParleyError>(())
        })
        .await;

        match result {
            Err(ParleyError::Timeout(msg)) => assert!(msg.starts_with("cache get")),
            other => panic!("Expected Timeout error, got {:?}", other),
        }
    }
}
