//! Delay helpers.
//!
//! [`Backoff`] spaces retries of the same strategy exponentially with
//! jitter; [`JitterRange`] produces the human-looking pause stealth
//! strategies insert before a request.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    variance_pct: f64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            variance_pct: 0.25,
        }
    }

    pub fn with_variance(mut self, variance_pct: f64) -> Self {
        self.variance_pct = variance_pct.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `retry` (zero-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2f64.powi(retry.min(16) as i32);
        let mut delay = self.base.as_secs_f64() * factor;

        let variance = delay * self.variance_pct;
        if variance > 0.0 {
            let jitter = rand::thread_rng().gen_range(-variance / 2.0..=variance / 2.0);
            delay += jitter;
        }
        let delay = delay.clamp(0.0, self.max.as_secs_f64());
        Duration::from_secs_f64(delay)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(8))
    }
}

/// Inclusive range of pauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterRange {
    pub min: Duration,
    pub max: Duration,
}

impl JitterRange {
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn sample(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let millis = rand::thread_rng().gen_range(self.min.as_millis()..=self.max.as_millis());
        Duration::from_millis(millis as u64)
    }
}
