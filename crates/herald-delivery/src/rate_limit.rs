//! Pacing between provider sends.
//!
//! The processor waits on a `RateLimiter` after every gateway call. Sleeps go
//! through the injected `Clock`, so tests measure pacing in virtual time.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use herald_core::Clock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    error::{DeliveryError, Result},
    DEFAULT_SEND_INTERVAL_MS,
};

/// Paces successive sends.
#[async_trait]
pub trait RateLimiter: Send + Sync + std::fmt::Debug {
    /// Waits until the next send is allowed.
    async fn wait(&self);
}

/// Sleeps a fixed interval on every call.
#[derive(Debug)]
pub struct FixedIntervalLimiter {
    interval: Duration,
    clock: Arc<dyn Clock>,
}

impl FixedIntervalLimiter {
    /// Creates a limiter sleeping `interval` per call.
    pub fn new(interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { interval, clock }
    }

    /// Configured interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[async_trait]
impl RateLimiter for FixedIntervalLimiter {
    async fn wait(&self) {
        if !self.interval.is_zero() {
            self.clock.sleep(self.interval).await;
        }
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket allowing bursts of up to `capacity` sends, refilled at a
/// steady rate.
#[derive(Debug)]
pub struct TokenBucketLimiter {
    capacity: f64,
    refill_per_second: f64,
    state: Mutex<BucketState>,
    clock: Arc<dyn Clock>,
}

impl TokenBucketLimiter {
    /// Creates a full bucket.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` when capacity is zero or the refill rate
    /// is not a positive finite number.
    pub fn new(capacity: u32, refill_per_second: f64, clock: Arc<dyn Clock>) -> Result<Self> {
        if capacity == 0 {
            return Err(DeliveryError::configuration("token bucket capacity must be at least 1"));
        }
        if !refill_per_second.is_finite() || refill_per_second <= 0.0 {
            return Err(DeliveryError::configuration(
                "token bucket refill rate must be greater than zero",
            ));
        }

        let capacity = f64::from(capacity);
        let state = Mutex::new(BucketState { tokens: capacity, last_refill: clock.now() });
        Ok(Self { capacity, refill_per_second, state, clock })
    }

    fn refill(&self, state: &mut BucketState) {
        let now = self.clock.now();
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_second).min(self.capacity);
        state.last_refill = now;
    }
}

#[async_trait]
impl RateLimiter for TokenBucketLimiter {
    async fn wait(&self) {
        let mut state = self.state.lock().await;
        self.refill(&mut state);

        if state.tokens < 1.0 {
            let deficit = 1.0 - state.tokens;
            let delay = Duration::from_secs_f64(deficit / self.refill_per_second);
            self.clock.sleep(delay).await;
            self.refill(&mut state);
        }

        state.tokens = (state.tokens - 1.0).max(0.0);
    }
}

/// Limiter that never waits.
#[derive(Debug, Default)]
pub struct UnlimitedLimiter;

#[async_trait]
impl RateLimiter for UnlimitedLimiter {
    async fn wait(&self) {}
}

/// Rate limiting strategy, selected by the `strategy` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum RateLimitConfig {
    /// Fixed pause after every send.
    FixedInterval {
        /// Pause in milliseconds.
        interval_ms: u64,
    },
    /// Bursty sending bounded by a token bucket.
    TokenBucket {
        /// Maximum burst size.
        capacity: u32,
        /// Tokens added per second.
        refill_per_second: f64,
    },
    /// No pacing.
    Disabled,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::FixedInterval { interval_ms: DEFAULT_SEND_INTERVAL_MS }
    }
}

impl RateLimitConfig {
    /// Validates the strategy parameters.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::FixedInterval { .. } | Self::Disabled => Ok(()),
            Self::TokenBucket { capacity, refill_per_second } => {
                if *capacity == 0 {
                    return Err(DeliveryError::configuration(
                        "token bucket capacity must be at least 1",
                    ));
                }
                if !refill_per_second.is_finite() || *refill_per_second <= 0.0 {
                    return Err(DeliveryError::configuration(
                        "token bucket refill rate must be greater than zero",
                    ));
                }
                Ok(())
            },
        }
    }

    /// Builds the limiter described by this configuration.
    pub fn build(&self, clock: Arc<dyn Clock>) -> Result<Arc<dyn RateLimiter>> {
        let limiter: Arc<dyn RateLimiter> = match self {
            Self::FixedInterval { interval_ms } => {
                Arc::new(FixedIntervalLimiter::new(Duration::from_millis(*interval_ms), clock))
            },
            Self::TokenBucket { capacity, refill_per_second } => {
                Arc::new(TokenBucketLimiter::new(*capacity, *refill_per_second, clock)?)
            },
            Self::Disabled => Arc::new(UnlimitedLimiter),
        };
        Ok(limiter)
    }
}
