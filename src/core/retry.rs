//! Exponential backoff retry policy

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::errors::{Result, TranslationError};

/// Retry budget and backoff curve for one provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
        }
    }

    /// Backoff after the `attempt`-th failure (1-based): `initial * 2^(attempt-1)`, capped
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 2u32.saturating_pow(exponent);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Backoff that also honours a rate-limit hint, still capped at `max_delay`
    pub fn delay_after(&self, attempt: u32, error: &TranslationError) -> Duration {
        let backoff = self.delay_for(attempt);
        match error.retry_after() {
            Some(hint) => backoff.max(hint).min(self.max_delay),
            None => backoff,
        }
    }

    /// Run `op` until it succeeds, fails terminally, or the budget runs out.
    ///
    /// `op` receives the 1-based attempt number. A cancelled token stops further
    /// attempts but never interrupts one that is already running.
    pub async fn run<F, Fut, T>(
        &self,
        label: &str,
        cancel: Option<&CancellationToken>,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!("{} succeeded after {} attempts", label, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => {
                    debug!("{} failed terminally on attempt {}: {}", label, attempt, e);
                    return Err(e);
                }
                Err(e) if attempt >= max_attempts => {
                    warn!("{} exhausted {} attempts: {}", label, max_attempts, e);
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_after(attempt, &e);
                    debug!(
                        "{} attempt {} failed ({}), retrying in {:?}",
                        label, attempt, e, delay
                    );

                    match cancel {
                        Some(token) => {
                            tokio::select! {
                                _ = token.cancelled() => return Err(TranslationError::Cancelled),
                                _ = sleep(delay) => {}
                            }
                        }
                        None => sleep(delay).await,
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(4, Duration::from_millis(100), Duration::from_millis(350))
    }

    #[test]
    fn test_delay_curve() {
        let p = policy();
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(350));
        assert_eq!(p.delay_for(40), Duration::from_millis(350));
    }

    #[test]
    fn test_rate_limit_hint_is_capped() {
        let p = policy();
        let hinted = TranslationError::RateLimitError {
            retry_after: Some(Duration::from_millis(150)),
        };
        assert_eq!(p.delay_after(1, &hinted), Duration::from_millis(150));

        let huge = TranslationError::RateLimitError {
            retry_after: Some(Duration::from_secs(60)),
        };
        assert_eq!(p.delay_after(1, &huge), Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_until_success() {
        let calls = AtomicU32::new(0);
        let result = policy()
            .run("test", None, |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(TranslationError::transient("mock", "flaky"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_and_delays() {
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let p = policy();

        let result: Result<()> = p
            .run("test", None, |_| {
                stamps.lock().unwrap().push(Instant::now());
                async { Err(TranslationError::transient("mock", "down")) }
            })
            .await;

        assert!(result.is_err());
        let stamps = stamps.lock().unwrap();
        assert_eq!(stamps.len(), 4);
        for n in 1..stamps.len() {
            let gap = stamps[n] - stamps[n - 1];
            let lower = p.initial_delay * 2u32.pow(n as u32 - 1);
            assert!(gap >= lower.min(p.max_delay), "gap {gap:?} below {lower:?}");
            assert!(gap <= p.max_delay);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = policy()
            .run("test", None, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TranslationError::config("bad key")) }
            })
            .await;

        assert!(matches!(result, Err(TranslationError::ConfigError { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_further_attempts() {
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result: Result<()> = policy()
            .run("test", Some(&token), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                token.cancel();
                async { Err(TranslationError::transient("mock", "down")) }
            })
            .await;

        assert!(matches!(result, Err(TranslationError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
