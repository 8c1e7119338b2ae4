//! Bounded exponential backoff.
//!
//! Used server side around store calls that may fail transiently, and client
//! side by `LiveFeed` when a subscription has to be re-established.

use crate::app_config::{RealtimeConfig, RetryConfig};
use crate::error::PollError;
use std::future::Future;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Never less than 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms.max(config.base_delay_ms)),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Reconnect policy for realtime clients.
    pub fn reconnect(config: &RealtimeConfig) -> Self {
        Self {
            max_attempts: config.reconnect_attempts.max(1),
            base_delay: Duration::from_millis(config.reconnect_delay_ms),
            max_delay: Duration::from_millis(config.reconnect_delay_ms.saturating_mul(8)),
        }
    }

    /// Delay after the given failed attempt (1-based): base * 2^(attempt-1), capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are used up.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PollError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    log::warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}.",
                        what,
                        attempt,
                        self.max_attempts,
                        err,
                        delay
                    );
                    actix_web::rt::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
