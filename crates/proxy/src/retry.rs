use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded retry with a linear delay schedule: `base`, `2 * base`, `3 * base`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub attempts: u32,
    /// Delay after the first failure, in milliseconds.
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 4, base_delay_ms: 300 }
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(attempts: u32, base_delay: Duration) -> Self {
        Self { attempts, base_delay_ms: base_delay.as_millis() as u64 }
    }

    /// Delay after the `attempt`-th failure (1-based).
    #[must_use]
    pub const fn delay_after(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(attempt as u64))
    }

    /// Sum of every delay a fully exhausted run sleeps.
    #[must_use]
    pub fn total_delay(&self) -> Duration {
        (1..self.attempts.max(1)).map(|attempt| self.delay_after(attempt)).sum()
    }
}

/// The last error of an exhausted [`retry`] run.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last: E,
}

/// Runs `op` until it succeeds or `policy.attempts` runs failed, sleeping between tries.
///
/// `op` receives the 1-based attempt number.
///
/// # Errors
/// [`Exhausted`] with the final attempt's error.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, Exhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(last) if attempt >= attempts => return Err(Exhausted { attempts: attempt, last }),
            Err(err) => {
                let delay = policy.delay_after(attempt);
                warn!(
                    what,
                    attempt,
                    of = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Attempt failed, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn test_linear_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(300));
        assert_eq!(policy.delay_after(3), Duration::from_millis(900));
        assert_eq!(policy.total_delay(), Duration::from_millis(1800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_last_attempt_after_full_backoff() {
        let started = Instant::now();
        let result = retry(&RetryPolicy::default(), "flaky", |attempt| async move {
            if attempt < 4 { Err(format!("failure {attempt}")) } else { Ok(attempt) }
        })
        .await;

        assert_eq!(result.unwrap(), 4);
        assert_eq!(started.elapsed(), Duration::from_millis(1800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_keeps_last_error() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let mut calls = 0;
        let err = retry(&policy, "always", |attempt| {
            calls += 1;
            async move { Err::<(), _>(format!("failure {attempt}")) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls, 3);
        assert_eq!(err.attempts, 3);
        assert_eq!(err.last, "failure 3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_tries_once() {
        let policy = RetryPolicy::new(0, Duration::from_millis(10));
        let result = retry(&policy, "once", |_| async { Ok::<_, String>(()) }).await;
        assert!(result.is_ok());
    }
}
