//! Request spacing.
//!
//! Keeps at least the configured interval between consecutive attempts
//! against the same platform, and optionally a global interval across all
//! platforms. Reservations are taken atomically so concurrent tasks line up
//! one slot after another instead of racing for the same one.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};

#[derive(Debug, Default)]
struct Schedule {
    platforms: HashMap<String, Instant>,
    global: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct RateLimiter {
    schedule: Mutex<Schedule>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the next free slot for `key` and returns when it starts.
    pub fn reserve(&self, key: &str, interval: Duration, global: Option<Duration>) -> Instant {
        let now = Instant::now();
        let mut schedule = self.schedule.lock().expect("rate limiter lock poisoned");
        let start = schedule.next_free(key, global.is_some()).max(now);
        schedule.claim(key, start, interval, global);
        start
    }

    /// Claims a slot for `key` only if one is open right now.
    pub fn try_reserve(&self, key: &str, interval: Duration, global: Option<Duration>) -> bool {
        let now = Instant::now();
        let mut schedule = self.schedule.lock().expect("rate limiter lock poisoned");
        if schedule.next_free(key, global.is_some()) > now {
            return false;
        }
        schedule.claim(key, now, interval, global);
        true
    }

    /// Sleeps until a slot for `key` is open without claiming it.
    pub async fn ready(&self, key: &str, global: bool) {
        let next = self
            .schedule
            .lock()
            .expect("rate limiter lock poisoned")
            .next_free(key, global);
        if next > Instant::now() {
            sleep_until(next).await;
        }
    }

    /// Reserves a slot and sleeps until it opens. Returns the time waited.
    pub async fn wait(&self, key: &str, interval: Duration, global: Option<Duration>) -> Duration {
        let start = self.reserve(key, interval, global);
        let waited = start.saturating_duration_since(Instant::now());
        if !waited.is_zero() {
            log::trace!("{key}: waiting {:?} for rate-limit slot", waited);
            sleep_until(start).await;
        }
        waited
    }
}

impl Schedule {
    fn next_free(&self, key: &str, global: bool) -> Instant {
        let mut next = Instant::now();
        if let Some(slot) = self.platforms.get(key) {
            next = next.max(*slot);
        }
        if global && let Some(slot) = self.global {
            next = next.max(slot);
        }
        next
    }

    fn claim(&mut self, key: &str, start: Instant, interval: Duration, global: Option<Duration>) {
        self.platforms.insert(key.to_string(), start + interval);
        if let Some(global) = global {
            self.global = Some(start + global);
        }
    }
}
