//! Metrics collection utilities.
//!
//! Aggregates attempt outcomes globally, per platform and per strategy, with
//! latency percentiles for observability.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::strategies::{AttemptStatus, StrategyKind};

/// Aggregated metrics across all platforms.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalStats {
    pub started_at: DateTime<Utc>,
    pub total_attempts: u64,
    pub definitive: u64,
    pub blocked: u64,
    pub errors: u64,
    pub resolutions: u64,
    pub short_circuited: u64,
    pub average_latency: Option<Duration>,
    pub p95_latency: Option<Duration>,
}

impl Default for GlobalStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            total_attempts: 0,
            definitive: 0,
            blocked: 0,
            errors: 0,
            resolutions: 0,
            short_circuited: 0,
            average_latency: None,
            p95_latency: None,
        }
    }
}

/// Platform-scoped metrics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformStats {
    pub platform: String,
    pub attempts: u64,
    pub statuses: BTreeMap<String, u64>,
    pub average_latency: Option<Duration>,
    pub p95_latency: Option<Duration>,
    pub consecutive_blocks: u32,
    pub last_status: Option<AttemptStatus>,
}

impl PlatformStats {
    fn from_accumulator(platform: &str, acc: &PlatformAccumulator) -> Self {
        let (avg, p95) = acc.latency_stats();
        Self {
            platform: platform.to_string(),
            attempts: acc.attempts,
            statuses: acc
                .statuses
                .iter()
                .map(|(status, count)| (status.to_string(), *count))
                .collect(),
            average_latency: avg,
            p95_latency: p95,
            consecutive_blocks: acc.consecutive_blocks,
            last_status: acc.last_status,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StrategyStats {
    pub attempts: u64,
    pub definitive: u64,
    pub blocked: u64,
    pub errors: u64,
    pub accepted: u64,
}

impl StrategyStats {
    /// Share of attempts that produced an `Available`/`Taken` verdict.
    pub fn definitive_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.definitive as f64 / self.attempts as f64
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub global: GlobalStats,
    pub platforms: Vec<PlatformStats>,
    pub strategies: BTreeMap<StrategyKind, StrategyStats>,
}

impl MetricsSnapshot {
    pub fn platform(&self, id: &str) -> Option<&PlatformStats> {
        self.platforms.iter().find(|stats| stats.platform == id)
    }
}

#[derive(Debug)]
struct PlatformAccumulator {
    attempts: u64,
    statuses: HashMap<AttemptStatus, u64>,
    latencies: VecDeque<Duration>,
    max_window: usize,
    consecutive_blocks: u32,
    last_status: Option<AttemptStatus>,
}

impl PlatformAccumulator {
    fn new(max_window: usize) -> Self {
        Self {
            attempts: 0,
            statuses: HashMap::new(),
            latencies: VecDeque::with_capacity(max_window),
            max_window,
            consecutive_blocks: 0,
            last_status: None,
        }
    }

    fn record(&mut self, status: AttemptStatus, latency: Duration) {
        self.attempts += 1;
        self.last_status = Some(status);
        *self.statuses.entry(status).or_insert(0) += 1;

        if status == AttemptStatus::Blocked {
            self.consecutive_blocks = self.consecutive_blocks.saturating_add(1);
        } else if status != AttemptStatus::Error {
            self.consecutive_blocks = 0;
        }

        if self.latencies.len() == self.max_window {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
    }

    fn latency_stats(&self) -> (Option<Duration>, Option<Duration>) {
        percentiles(self.latencies.iter().copied())
    }
}

fn percentiles(samples: impl Iterator<Item = Duration>) -> (Option<Duration>, Option<Duration>) {
    let mut samples: Vec<_> = samples.collect();
    if samples.is_empty() {
        return (None, None);
    }
    samples.sort_unstable();
    let avg = samples.iter().map(|d| d.as_secs_f64()).sum::<f64>() / samples.len() as f64;
    let p95_index = ((samples.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
    (Some(Duration::from_secs_f64(avg)), Some(samples[p95_index]))
}

#[derive(Debug)]
struct MetricsState {
    global: GlobalStats,
    max_window: usize,
    platforms: HashMap<String, PlatformAccumulator>,
    strategies: BTreeMap<StrategyKind, StrategyStats>,
}

impl MetricsState {
    fn new(max_window: usize) -> Self {
        Self {
            global: GlobalStats::default(),
            max_window,
            platforms: HashMap::new(),
            strategies: BTreeMap::new(),
        }
    }

    fn accumulator_mut(&mut self, platform: &str) -> &mut PlatformAccumulator {
        self.platforms
            .entry(platform.to_string())
            .or_insert_with(|| PlatformAccumulator::new(self.max_window))
    }
}

/// Thread-safe metrics collector shared by the engine and its handlers.
#[derive(Clone, Debug)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_window(128)
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsState::new(window.max(16)))),
        }
    }

    pub fn record_attempt(
        &self,
        platform: &str,
        strategy: StrategyKind,
        status: AttemptStatus,
        latency: Duration,
    ) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.global.total_attempts += 1;
        match status {
            AttemptStatus::Available | AttemptStatus::Taken => guard.global.definitive += 1,
            AttemptStatus::Blocked => guard.global.blocked += 1,
            AttemptStatus::Error => guard.global.errors += 1,
            AttemptStatus::Ambiguous => {}
        }

        guard.global.average_latency = Some(match guard.global.average_latency {
            Some(avg) => {
                Duration::from_secs_f64(avg.as_secs_f64() * 0.9 + latency.as_secs_f64() * 0.1)
            }
            None => latency,
        });

        let stats = guard.strategies.entry(strategy).or_default();
        stats.attempts += 1;
        match status {
            AttemptStatus::Available | AttemptStatus::Taken => stats.definitive += 1,
            AttemptStatus::Blocked => stats.blocked += 1,
            AttemptStatus::Error => stats.errors += 1,
            AttemptStatus::Ambiguous => {}
        }

        guard.accumulator_mut(platform).record(status, latency);

        let (_, p95) = percentiles(
            guard
                .platforms
                .values()
                .flat_map(|acc| acc.latencies.iter().copied()),
        );
        guard.global.p95_latency = p95;
    }

    /// Final per-pair result; `accepted_by` names the strategy whose outcome
    /// cleared the threshold, if any.
    pub fn record_resolution(&self, accepted_by: Option<StrategyKind>, short_circuited: bool) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.global.resolutions += 1;
        if short_circuited {
            guard.global.short_circuited += 1;
        }
        if let Some(strategy) = accepted_by {
            guard.strategies.entry(strategy).or_default().accepted += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let guard = self.inner.lock().expect("metrics lock poisoned");
        let mut platforms: Vec<_> = guard
            .platforms
            .iter()
            .map(|(platform, acc)| PlatformStats::from_accumulator(platform, acc))
            .collect();
        platforms.sort_by(|a, b| a.platform.cmp(&b.platform));
        MetricsSnapshot {
            global: guard.global.clone(),
            platforms,
            strategies: guard.strategies.clone(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_attempts_per_platform_and_strategy() {
        let metrics = MetricsCollector::new();
        metrics.record_attempt(
            "github",
            StrategyKind::HttpBasic,
            AttemptStatus::Blocked,
            Duration::from_millis(150),
        );
        metrics.record_attempt(
            "github",
            StrategyKind::HttpStealth,
            AttemptStatus::Taken,
            Duration::from_millis(800),
        );
        metrics.record_resolution(Some(StrategyKind::HttpStealth), false);

        let snapshot = metrics.snapshot();
        let github = snapshot.platform("github").unwrap();
        assert_eq!(github.attempts, 2);
        assert_eq!(github.statuses.get("blocked"), Some(&1));
        assert_eq!(github.consecutive_blocks, 0);
        assert_eq!(github.p95_latency, Some(Duration::from_millis(800)));

        assert_eq!(snapshot.global.total_attempts, 2);
        assert_eq!(snapshot.global.resolutions, 1);
        let stealth = &snapshot.strategies[&StrategyKind::HttpStealth];
        assert_eq!((stealth.definitive, stealth.accepted), (1, 1));
        assert_eq!(snapshot.strategies[&StrategyKind::HttpBasic].definitive_rate(), 0.0);
    }

    #[test]
    fn counts_consecutive_blocks() {
        let metrics = MetricsCollector::new();
        for status in [AttemptStatus::Blocked, AttemptStatus::Error, AttemptStatus::Blocked] {
            metrics.record_attempt("tiktok", StrategyKind::BrowserLight, status, Duration::ZERO);
        }
        assert_eq!(metrics.snapshot().platform("tiktok").unwrap().consecutive_blocks, 2);
    }
}
