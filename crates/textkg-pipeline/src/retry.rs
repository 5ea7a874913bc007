//! Retry with configurable backoff for transient model-backend errors.

use std::time::Duration;

use textkg_types::KgError;

/// Backoff policy controlling the delay between retry attempts.
#[derive(Debug, Clone)]
pub enum BackoffPolicy {
    /// Fixed delay between retries.
    Fixed(Duration),
    /// Exponential backoff: base * 2^attempt, capped at max.
    Exponential { base: Duration, max: Duration },
    /// No delay between retries.
    None,
}

impl BackoffPolicy {
    /// Compute the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            BackoffPolicy::Fixed(d) => *d,
            BackoffPolicy::Exponential { base, max } => {
                let millis = base.as_millis() as u64 * 2u64.saturating_pow(attempt);
                Duration::from_millis(millis).min(*max)
            }
            BackoffPolicy::None => Duration::ZERO,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

/// Call `f` up to `max_attempts` times, retrying only errors that satisfy
/// [`KgError::is_retryable`]. Non-retryable errors return immediately.
pub async fn retry_with_backoff<T, F, Fut>(
    f: F,
    max_attempts: u32,
    policy: &BackoffPolicy,
    what: &str,
) -> Result<T, KgError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, KgError>>,
{
    debug_assert!(max_attempts >= 1);
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    what = %what,
                    attempt,
                    delay_ms = %delay.as_millis(),
                    error = %e,
                    "Retryable error, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn success_on_first_try() {
        let result: Result<u32, KgError> =
            retry_with_backoff(|| async { Ok(42) }, 3, &BackoffPolicy::None, "test").await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retry_on_retryable_error_succeeds() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let cc = call_count.clone();

        let result = retry_with_backoff(
            move || {
                let cc = cc.clone();
                async move {
                    let n = cc.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        Err(KgError::RateLimited {
                            provider: "test".into(),
                            retry_after_ms: 100,
                        })
                    } else {
                        Ok("recovered")
                    }
                }
            },
            3,
            &BackoffPolicy::None,
            "test",
        )
        .await;

        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_attempts_return_last_error() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let cc = call_count.clone();

        let result: Result<(), KgError> = retry_with_backoff(
            move || {
                let cc = cc.clone();
                async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    Err(KgError::RateLimited {
                        provider: "test".into(),
                        retry_after_ms: 0,
                    })
                }
            },
            3,
            &BackoffPolicy::None,
            "test",
        )
        .await;

        assert!(matches!(result.unwrap_err(), KgError::RateLimited { .. }));
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_returns_immediately() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let cc = call_count.clone();

        let result: Result<(), KgError> = retry_with_backoff(
            move || {
                let cc = cc.clone();
                async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    Err(KgError::AuthError {
                        provider: "test".into(),
                    })
                }
            },
            5,
            &BackoffPolicy::None,
            "test",
        )
        .await;

        assert!(matches!(result.unwrap_err(), KgError::AuthError { .. }));
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fixed_backoff_constant_delay() {
        let policy = BackoffPolicy::Fixed(Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(7), Duration::from_millis(200));
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let policy = BackoffPolicy::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(500));
    }

    #[test]
    fn default_backoff_is_exponential_base_one_second() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(20), Duration::from_secs(30));
    }
}
