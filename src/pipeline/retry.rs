use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Attempts and backoff for one retried operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay_ms: u64, multiplier: f64) -> Self {
        Self {
            max_attempts,
            initial_delay_ms,
            multiplier,
        }
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Delay slept after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.saturating_sub(1) as i32);
        self.initial_delay().mul_f64(factor)
    }
}

/// Run `operation` until it succeeds or `max_attempts` is reached.
///
/// The operation receives the 1-based attempt number. Between failures the
/// helper sleeps `initial_delay`, then `initial_delay * multiplier`, and so on.
/// After the final failure the last error is returned. Nothing else is
/// observed or logged here; callers decide what a failure means.
pub async fn retry_with_backoff<T, E, F, Fut>(
    mut operation: F,
    max_attempts: u32,
    initial_delay: Duration,
    multiplier: f64,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = max_attempts.max(1);
    let mut delay = initial_delay;
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= attempts => return Err(err),
            Err(_) => {
                tokio::time::sleep(delay).await;
                delay = delay.mul_f64(multiplier.max(1.0));
                attempt += 1;
            }
        }
    }
}

/// [`retry_with_backoff`] driven by a [`RetryPolicy`].
pub async fn retry_with_policy<T, E, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_with_backoff(
        operation,
        policy.max_attempts,
        policy.initial_delay(),
        policy.multiplier,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_returns_first_success() {
        let mut calls = 0;
        let result: Result<u32, String> = retry_with_backoff(
            |attempt| {
                calls += 1;
                async move {
                    if attempt < 3 {
                        Err(format!("attempt {attempt} failed"))
                    } else {
                        Ok(attempt)
                    }
                }
            },
            4,
            Duration::from_millis(1),
            2.0,
        )
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_returns_last_error_after_exhaustion() {
        let mut calls = 0;
        let result: Result<(), String> = retry_with_backoff(
            |attempt| {
                calls += 1;
                async move { Err(format!("attempt {attempt} failed")) }
            },
            4,
            Duration::from_millis(1),
            2.0,
        )
        .await;

        assert_eq!(result, Err("attempt 4 failed".to_string()));
        assert_eq!(calls, 4);
    }

    #[tokio::test]
    async fn test_backoff_delays_grow() {
        let started = Instant::now();
        let _: Result<(), ()> =
            retry_with_backoff(|_| async { Err(()) }, 3, Duration::from_millis(10), 2.0).await;
        // 10ms + 20ms between three attempts
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_policy_delay_schedule() {
        let policy = RetryPolicy::new(4, 800, 2.0);
        assert_eq!(policy.delay_after(1), Duration::from_millis(800));
        assert_eq!(policy.delay_after(2), Duration::from_millis(1600));
        assert_eq!(policy.delay_after(3), Duration::from_millis(3200));
    }
}
