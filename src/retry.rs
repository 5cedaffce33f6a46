//! Bounded retry for transient capability failures
//!
//! Only errors for which [`Error::is_transient`] holds are retried. Delay for
//! retry `n` (1-based) is `min(base * 2^(n-1) + jitter, max)` where jitter is
//! uniform in `[0, base]`.

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the initial attempt
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }

    /// Policy that never waits; used in tests
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Backoff before retry number `retry` (1-based), without jitter
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(20);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    fn jittered_delay(&self, retry: u32) -> Duration {
        let jitter = if self.base_delay_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.base_delay_ms)
        };
        let delay = self.delay_for_retry(retry) + Duration::from_millis(jitter);
        delay.min(Duration::from_millis(self.max_delay_ms))
    }

    /// Run `op` until it succeeds, fails non-transiently, or retries run out.
    ///
    /// The error of the final attempt is returned unchanged.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retry = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && retry < self.max_retries => {
                    retry += 1;
                    let delay = self.jittered_delay(retry);
                    warn!(
                        "{} failed transiently ({}); retry {}/{} in {:?}",
                        label, err, retry, self.max_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Some providers report throttling in the body of a 400 or 500
pub fn looks_rate_limited(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("rate limit") || lower.contains("rate_limit") || lower.contains("too many requests")
}

/// Wrap a capability failure, marking rate-limit messages transient
pub fn capability_error(message: impl Into<String>) -> Error {
    let message = message.into();
    if looks_rate_limited(&message) {
        Error::TransientCapability(message)
    } else {
        Error::Capability(message)
    }
}
