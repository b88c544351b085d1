//! Timeout Orchestrator
//!
//! Races an operation against a deadline. On expiry the caller gets the
//! fallback immediately while the operation keeps running detached on the
//! runtime, so its side effects (cache writes in particular) still land.
//! Nothing is cancelled; callers that need strictly fresh data re-query.

use std::future::Future;
use std::time::Duration;

/// Await `operation` for at most `duration`, otherwise return `fallback`
pub async fn with_timeout<F, T>(operation: F, duration: Duration, fallback: T) -> T
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let mut handle = tokio::spawn(operation);

    match tokio::time::timeout(duration, &mut handle).await {
        Ok(Ok(value)) => value,
        Ok(Err(join_error)) => {
            tracing::error!(error = %join_error, "Timed operation aborted");
            fallback
        }
        Err(_) => {
            tracing::debug!(
                timeout_ms = duration.as_millis() as u64,
                "Deadline reached, operation left running in background"
            );
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::time::{sleep, Instant};

    use crate::adapters::cache::TtlCache;

    #[tokio::test(start_paused = true)]
    async fn test_fast_operation_wins() {
        let value = with_timeout(async { 7 }, Duration::from_millis(100), 0).await;
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_operation_completes_after_fallback() {
        let cache: Arc<TtlCache<&'static str, u32>> = Arc::new(TtlCache::new());
        let started = Instant::now();

        let slow_cache = Arc::clone(&cache);
        let slow_op = async move {
            sleep(Duration::from_millis(500)).await;
            slow_cache.set("floor", 42, Duration::from_secs(60));
            42
        };

        let value = with_timeout(slow_op, Duration::from_millis(100), 0).await;
        assert_eq!(value, 0);
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(cache.get(&"floor"), None);

        sleep(Duration::from_millis(500)).await;
        assert_eq!(cache.get(&"floor"), Some(42));
    }

    #[tokio::test]
    async fn test_panicking_operation_yields_fallback() {
        let value = with_timeout(
            async {
                if true {
                    panic!("upstream decoder blew up");
                }
                1
            },
            Duration::from_secs(1),
            -1,
        )
        .await;
        assert_eq!(value, -1);
    }
}
