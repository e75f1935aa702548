//! Jittered resync ticker.
//!
//! Each tick sleeps for the minimum interval plus a uniformly random extra
//! delay, so that agents on many hosts do not resync in lockstep.

use std::time::Duration;

use rand::Rng;

/// Returned when both the interval and the jitter are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("resync interval and jitter are both zero")]
pub struct ZeroIntervalError;

/// Ticker that fires every `min + uniform[0, max_jitter)`.
#[derive(Debug, Clone)]
pub struct JitteredTicker {
    min: Duration,
    max_jitter: Duration,
}

impl JitteredTicker {
    /// Create a ticker. A zero `max_jitter` disables jitter.
    pub fn new(min: Duration, max_jitter: Duration) -> Result<Self, ZeroIntervalError> {
        if min.is_zero() && max_jitter.is_zero() {
            return Err(ZeroIntervalError);
        }
        Ok(Self { min, max_jitter })
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max_jitter(&self) -> Duration {
        self.max_jitter
    }

    /// Pick the delay for the next tick without sleeping.
    pub fn next_delay(&self) -> Duration {
        let jitter_nanos = u64::try_from(self.max_jitter.as_nanos()).unwrap_or(u64::MAX);
        if jitter_nanos == 0 {
            return self.min;
        }
        let extra = rand::thread_rng().gen_range(0..jitter_nanos);
        self.min.saturating_add(Duration::from_nanos(extra))
    }

    /// Sleep until the next tick and return how long it slept.
    pub async fn tick(&mut self) -> Duration {
        let delay = self.next_delay();
        tokio::time::sleep(delay).await;
        delay
    }
}
