//! Per-provider token bucket

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::core::errors::{Result, TranslationError};

/// Mutable bucket state, only touched under the limiter's lock
#[derive(Debug, Clone)]
pub struct RateLimiterState {
    pub available_tokens: f64,
    pub last_refill_time: Instant,
    pub capacity: f64,
    pub refill_rate_per_second: f64,
}

impl RateLimiterState {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill_time).as_secs_f64();
        self.available_tokens =
            (self.available_tokens + elapsed * self.refill_rate_per_second).min(self.capacity);
        self.last_refill_time = now;
    }

    /// Time until one whole token is available
    fn wait_hint(&self) -> Option<Duration> {
        if self.refill_rate_per_second <= 0.0 {
            return None;
        }
        let missing = (1.0 - self.available_tokens).max(0.0);
        Some(Duration::from_secs_f64(missing / self.refill_rate_per_second))
    }
}

/// Token bucket that rejects instead of waiting.
///
/// Callers decide whether to back off and try again; the limiter never
/// sleeps while holding its lock.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<RateLimiterState>>,
}

impl RateLimiter {
    /// Create a full bucket
    pub fn new(capacity: f64, refill_rate_per_second: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(RateLimiterState {
                available_tokens: capacity,
                last_refill_time: Instant::now(),
                capacity,
                refill_rate_per_second,
            })),
        }
    }

    /// Take one token or fail with `RateLimitError`
    pub async fn try_acquire(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.refill(Instant::now());

        if state.available_tokens < 1.0 {
            let retry_after = state.wait_hint();
            debug!(
                "Rate limit hit: {:.3} tokens available, retry after {:?}",
                state.available_tokens, retry_after
            );
            return Err(TranslationError::RateLimitError { retry_after });
        }

        state.available_tokens -= 1.0;
        Ok(())
    }

    /// Tokens currently available, after a lazy refill
    pub async fn available(&self) -> f64 {
        let mut state = self.state.lock().await;
        state.refill(Instant::now());
        state.available_tokens
    }

    /// Copy of the current state
    pub async fn snapshot(&self) -> RateLimiterState {
        self.state.lock().await.clone()
    }
}
