//! Timeout, exponential backoff and jitter
//!
//! [`RetryingGateway`] wraps any [`TextGenerator`]. Each attempt runs under
//! its own timeout; retryable failures sleep for
//! `min(max_delay, base_delay * 2^n) * (1 ± jitter_fraction)` before the next
//! attempt. Non-retryable failures are returned immediately.

use crate::error::GatewayError;
use crate::generator::TextGenerator;
use crate::types::{GenerationRequest, GenerationResponse};
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry and timeout settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Backoff cap
    pub max_delay_ms: u64,
    /// Symmetric jitter fraction in `[0, 1]`
    pub jitter_fraction: f64,
    /// Per-attempt timeout
    pub call_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            jitter_fraction: 0.25,
            call_timeout_ms: 120_000,
        }
    }
}

impl RetryPolicy {
    /// Set attempt count
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set base and cap delays
    #[inline]
    #[must_use]
    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay_ms = duration_ms(base);
        self.max_delay_ms = duration_ms(max);
        self
    }

    /// Set jitter fraction
    #[inline]
    #[must_use]
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction;
        self
    }

    /// Set per-attempt timeout
    #[inline]
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = duration_ms(timeout);
        self
    }

    /// Per-attempt timeout
    #[inline]
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Un-jittered delay after the `retry`-th failure (0-based)
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry.min(32)).unwrap_or(u64::MAX);
        let delay = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Jittered delay after the `retry`-th failure
    ///
    /// Falls back to the un-jittered delay when the jittered one is not a
    /// representable [`Duration`].
    #[must_use]
    pub fn jittered_backoff(&self, retry: u32) -> Duration {
        let base = self.backoff(retry);
        let jitter = self.jitter_fraction.clamp(0.0, 1.0);
        if jitter.is_nan() || jitter <= f64::EPSILON {
            return base;
        }
        let factor = 1.0 + rand::rng().random_range(-jitter..=jitter);
        Duration::try_from_secs_f64(base.as_secs_f64() * factor.max(0.0)).unwrap_or(base)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Retrying decorator over a generator
#[derive(Debug, Clone)]
pub struct RetryingGateway<G> {
    inner: G,
    policy: RetryPolicy,
}

impl<G: TextGenerator> RetryingGateway<G> {
    /// Wrap `inner` with `policy`
    #[inline]
    #[must_use]
    pub fn new(inner: G, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Active policy
    #[inline]
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn attempt(&self, request: &GenerationRequest) -> Result<GenerationResponse, GatewayError> {
        let timeout = self.policy.call_timeout();
        match tokio::time::timeout(timeout, self.inner.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout {
                timeout_ms: self.policy.call_timeout_ms,
            }),
        }
    }
}

#[async_trait]
impl<G: TextGenerator> TextGenerator for RetryingGateway<G> {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, GatewayError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut retry = 0;
        loop {
            match self.attempt(request).await {
                Ok(response) => return Ok(response),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) if retry + 1 >= attempts => {
                    tracing::warn!(label = %request.label, attempts, error = %err, "generation retries exhausted");
                    return Err(GatewayError::RetriesExhausted {
                        attempts,
                        last: Box::new(err),
                    });
                }
                Err(err) => {
                    let delay = self.policy.jittered_backoff(retry);
                    tracing::debug!(
                        label = %request.label,
                        attempt = retry + 1,
                        delay_ms = duration_ms(delay),
                        error = %err,
                        "retrying generation call"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
            }
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
