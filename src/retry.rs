//! Bounded-backoff retry template shared by the Route Refresh Service
//! (C12) and the Event Subscriber (C13). Grounded on
//! `meridian-cache`'s `RedisCache::execute_with_retry` — same
//! attempt-count-then-give-up shape, generalized to exponential backoff
//! with a ceiling per spec.md §5's "N attempts, exponential backoff with
//! a ceiling".

use crate::config::RetryConfig;
use std::future::Future;

/// Runs `f` up to `config.max_attempts` times, doubling the delay after
/// each failure and capping it at `config.max_backoff`. Returns the last
/// error if every attempt fails.
pub async fn execute_with_retry<T, E, F, Fut>(config: &RetryConfig, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    let mut backoff = config.initial_backoff;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt >= config.max_attempts {
                    return Err(e);
                }
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(config.max_backoff);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn succeeds_without_retry_when_first_attempt_works() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = execute_with_retry(&config(3), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_up_to_max_attempts_then_gives_up() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = execute_with_retry(&config(3), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("boom")
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = execute_with_retry(&config(5), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err("transient")
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
    }
}
