//! Proxy rotation and health tracking utilities.
//!
//! Tracks proxy performance, cools down unhealthy endpoints, and selects the
//! next candidate based on the chosen rotation strategy. Each endpoint has
//! its own lock so concurrent tasks only contend on the endpoint they touch.

use rand::Rng;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::time::Duration;
use tokio::time::Instant;

/// Weight of the newest observation in the moving success rate.
const SUCCESS_RATE_ALPHA: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    Sequential,
    Random,
    Smart,
    Weighted,
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub rotation_strategy: RotationStrategy,
    /// Consecutive failures that put an endpoint on cool-down.
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            rotation_strategy: RotationStrategy::Sequential,
            failure_threshold: 3,
            cooldown: Duration::from_secs(300),
        }
    }
}

/// Snapshot of an endpoint lent to one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyEndpoint {
    pub address: String,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub last_latency: Option<Duration>,
    pub cooldown_until: Option<Instant>,
}

/// How an attempt through a proxy went.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProxyFeedback {
    Success { latency: Duration },
    Failure,
    Blocked,
}

/// Borrowed endpoint; hand it back through [`ProxyPool::release`].
#[derive(Debug)]
pub struct ProxyLease {
    index: usize,
    pub endpoint: ProxyEndpoint,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProxyStats {
    pub address: String,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub success_rate: f64,
    pub last_latency_ms: Option<u64>,
    pub cooling_down: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProxyHealthReport {
    pub total_proxies: usize,
    pub available_proxies: usize,
    pub cooling_down: usize,
    pub details: Vec<ProxyStats>,
}

#[derive(Debug)]
struct ProxyEntry {
    address: String,
    successes: u64,
    failures: u64,
    consecutive_failures: u32,
    success_rate: f64,
    last_latency: Option<Duration>,
    last_used: Option<Instant>,
    cooldown_until: Option<Instant>,
}

impl ProxyEntry {
    fn new(address: String) -> Self {
        Self {
            address,
            successes: 0,
            failures: 0,
            consecutive_failures: 0,
            success_rate: 1.0,
            last_latency: None,
            last_used: None,
            cooldown_until: None,
        }
    }

    fn is_available(&self, now: Instant) -> bool {
        self.cooldown_until.is_none_or(|until| now >= until)
    }

    fn score(&self, now: Instant) -> f64 {
        let recency = self
            .last_used
            .map(|ts| now.duration_since(ts).as_secs_f64())
            .unwrap_or(300.0)
            / 300.0;
        (self.success_rate * 0.7) + (recency.clamp(0.0, 1.0) * 0.3)
    }

    fn snapshot(&self) -> ProxyEndpoint {
        ProxyEndpoint {
            address: self.address.clone(),
            successes: self.successes,
            failures: self.failures,
            success_rate: self.success_rate,
            last_latency: self.last_latency,
            cooldown_until: self.cooldown_until,
        }
    }
}

/// Shared pool of egress endpoints.
#[derive(Debug)]
pub struct ProxyPool {
    config: ProxyConfig,
    entries: Vec<Mutex<ProxyEntry>>,
    cursor: AtomicUsize,
}

impl ProxyPool {
    pub fn new<I>(proxies: I, config: ProxyConfig) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let mut addresses: Vec<String> = Vec::new();
        for proxy in proxies {
            let address = proxy.into();
            if !address.trim().is_empty() && !addresses.contains(&address) {
                addresses.push(address);
            }
        }
        Self {
            config,
            entries: addresses
                .into_iter()
                .map(|address| Mutex::new(ProxyEntry::new(address)))
                .collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::<String>::new(), ProxyConfig::default())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Picks an endpoint. When every endpoint is cooling down the one that
    /// recovers first is handed out early.
    pub fn acquire(&self) -> Option<ProxyLease> {
        if self.entries.is_empty() {
            return None;
        }

        let now = Instant::now();
        let mut available = Vec::with_capacity(self.entries.len());
        let mut scores = Vec::with_capacity(self.entries.len());
        let mut soonest: Option<(usize, Instant)> = None;
        for (idx, entry) in self.entries.iter().enumerate() {
            let entry = entry.lock().expect("proxy lock poisoned");
            if entry.is_available(now) {
                available.push(idx);
                scores.push(entry.score(now));
            } else if let Some(until) = entry.cooldown_until
                && soonest.is_none_or(|(_, current)| until < current)
            {
                soonest = Some((idx, until));
            }
        }

        let index = if available.is_empty() {
            soonest.map(|(idx, _)| idx)?
        } else {
            let mut rng = rand::thread_rng();
            match self.config.rotation_strategy {
                RotationStrategy::Sequential => {
                    let turn = self.cursor.fetch_add(1, AtomicOrdering::Relaxed);
                    available[turn % available.len()]
                }
                RotationStrategy::Random => *available.choose(&mut rng)?,
                RotationStrategy::Smart => available
                    .iter()
                    .zip(&scores)
                    .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(Ordering::Equal))
                    .map(|(idx, _)| *idx)?,
                RotationStrategy::Weighted => weighted_choice(&mut rng, &available, &scores)?,
            }
        };

        let mut entry = self.entries[index].lock().expect("proxy lock poisoned");
        entry.last_used = Some(now);
        Some(ProxyLease {
            index,
            endpoint: entry.snapshot(),
        })
    }

    pub fn release(&self, lease: ProxyLease, feedback: ProxyFeedback) {
        let Some(slot) = self.entries.get(lease.index) else {
            return;
        };
        let mut entry = slot.lock().expect("proxy lock poisoned");
        match feedback {
            ProxyFeedback::Success { latency } => {
                entry.successes += 1;
                entry.consecutive_failures = 0;
                entry.cooldown_until = None;
                entry.last_latency = Some(latency);
                entry.success_rate += SUCCESS_RATE_ALPHA * (1.0 - entry.success_rate);
            }
            ProxyFeedback::Failure | ProxyFeedback::Blocked => {
                entry.failures += 1;
                entry.consecutive_failures += 1;
                entry.success_rate -= SUCCESS_RATE_ALPHA * entry.success_rate;
                if entry.consecutive_failures >= self.config.failure_threshold.max(1) {
                    entry.cooldown_until = Some(Instant::now() + self.config.cooldown);
                    entry.consecutive_failures = 0;
                    log::warn!(
                        "proxy {} cooling down for {:?} after repeated failures",
                        entry.address,
                        self.config.cooldown
                    );
                }
            }
        }
    }

    pub fn health_report(&self) -> ProxyHealthReport {
        let now = Instant::now();
        let mut details = Vec::with_capacity(self.entries.len());
        let mut available = 0;
        for entry in &self.entries {
            let entry = entry.lock().expect("proxy lock poisoned");
            let cooling_down = !entry.is_available(now);
            if !cooling_down {
                available += 1;
            }
            details.push(ProxyStats {
                address: entry.address.clone(),
                successes: entry.successes,
                failures: entry.failures,
                consecutive_failures: entry.consecutive_failures,
                success_rate: entry.success_rate,
                last_latency_ms: entry.last_latency.map(|latency| latency.as_millis() as u64),
                cooling_down,
            });
        }

        ProxyHealthReport {
            total_proxies: self.entries.len(),
            available_proxies: available,
            cooling_down: self.entries.len() - available,
            details,
        }
    }
}

fn weighted_choice<R: Rng + ?Sized>(rng: &mut R, indices: &[usize], scores: &[f64]) -> Option<usize> {
    let weights: Vec<f64> = scores.iter().map(|score| score.max(0.1)).collect();
    let total: f64 = weights.iter().sum();
    if total <= f64::EPSILON {
        return indices.choose(rng).copied();
    }

    let mut target = rng.gen_range(0.0..total);
    for (index, weight) in indices.iter().zip(weights.iter()) {
        if target <= *weight {
            return Some(*index);
        }
        target -= *weight;
    }

    indices.last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotates_sequentially() {
        let pool = ProxyPool::new(
            ["http://1.1.1.1:8080", "http://2.2.2.2:8080"],
            ProxyConfig::default(),
        );
        let first = pool.acquire().unwrap();
        let second = pool.acquire().unwrap();
        assert_ne!(first.endpoint.address, second.endpoint.address);
    }

    #[test]
    fn cools_down_after_consecutive_failures() {
        let pool = ProxyPool::new(
            ["http://1.1.1.1:8080", "http://2.2.2.2:8080"],
            ProxyConfig {
                failure_threshold: 2,
                cooldown: Duration::from_secs(60),
                ..Default::default()
            },
        );
        // Sequential rotation alternates between the two endpoints.
        for feedback in [
            ProxyFeedback::Failure,
            ProxyFeedback::Success {
                latency: Duration::from_millis(80),
            },
            ProxyFeedback::Blocked,
        ] {
            let lease = pool.acquire().unwrap();
            pool.release(lease, feedback);
        }

        let report = pool.health_report();
        assert_eq!(report.cooling_down, 1);
        assert!(report.details[0].cooling_down);
        for _ in 0..4 {
            let lease = pool.acquire().unwrap();
            assert_eq!(lease.endpoint.address, "http://2.2.2.2:8080");
        }
    }

    #[test]
    fn hands_out_soonest_endpoint_when_all_cool_down() {
        let pool = ProxyPool::new(
            ["http://1.1.1.1:8080"],
            ProxyConfig {
                failure_threshold: 1,
                ..Default::default()
            },
        );
        let lease = pool.acquire().unwrap();
        pool.release(lease, ProxyFeedback::Failure);
        assert_eq!(pool.health_report().available_proxies, 0);
        let lease = pool.acquire().unwrap();
        assert_eq!(lease.endpoint.address, "http://1.1.1.1:8080");
        assert!(lease.endpoint.cooldown_until.is_some());
    }

    #[test]
    fn success_resets_failure_streak() {
        let pool = ProxyPool::new(["http://1.1.1.1:8080"], ProxyConfig::default());
        let lease = pool.acquire().unwrap();
        pool.release(lease, ProxyFeedback::Failure);
        let lease = pool.acquire().unwrap();
        pool.release(
            lease,
            ProxyFeedback::Success {
                latency: Duration::from_millis(120),
            },
        );
        let stats = &pool.health_report().details[0];
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.last_latency_ms, Some(120));
        assert_eq!((stats.successes, stats.failures), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn cooled_down_endpoint_recovers_after_cooldown() {
        let pool = ProxyPool::new(
            ["http://1.1.1.1:8080", "http://2.2.2.2:8080"],
            ProxyConfig {
                failure_threshold: 1,
                cooldown: Duration::from_secs(30),
                ..Default::default()
            },
        );
        let lease = pool.acquire().unwrap();
        assert_eq!(lease.endpoint.address, "http://1.1.1.1:8080");
        pool.release(lease, ProxyFeedback::Blocked);
        assert_eq!(pool.health_report().available_proxies, 1);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(pool.health_report().details[0].cooling_down);

        tokio::time::advance(Duration::from_secs(2)).await;
        let report = pool.health_report();
        assert_eq!(report.available_proxies, 2);
        assert!(!report.details[0].cooling_down);
    }

    #[test]
    fn empty_pool_yields_nothing() {
        assert!(ProxyPool::empty().acquire().is_none());
    }
}
