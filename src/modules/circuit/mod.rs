//! Per-platform circuit breaker.
//!
//! Counts `Blocked` outcomes inside a sliding window. Once the count reaches
//! the threshold the platform is short-circuited for the cool-down period.
//! A definitive or ambiguous answer means the platform is talking to us
//! again and clears the record.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::strategies::AttemptStatus;

#[derive(Debug, Clone)]
pub struct CircuitConfig {
    pub threshold: u32,
    pub window: Duration,
    pub cooldown: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Default)]
struct PlatformCircuit {
    recent_blocks: VecDeque<Instant>,
    open_until: Option<Instant>,
}

impl PlatformCircuit {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(front) = self.recent_blocks.front() {
            if now.saturating_duration_since(*front) > window {
                self.recent_blocks.pop_front();
            } else {
                break;
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct CircuitBreaker {
    config: CircuitConfig,
    circuits: Mutex<HashMap<String, PlatformCircuit>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Remaining cool-down when the platform's circuit is open.
    pub fn open_for(&self, platform: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut circuits = self.circuits.lock().expect("circuit lock poisoned");
        let circuit = circuits.get_mut(platform)?;
        match circuit.open_until {
            Some(until) if until > now => Some(until - now),
            Some(_) => {
                circuit.open_until = None;
                circuit.recent_blocks.clear();
                None
            }
            None => None,
        }
    }

    /// Feeds one attempt status. Returns `true` when this call opened the
    /// circuit.
    pub fn record(&self, platform: &str, status: AttemptStatus) -> bool {
        let now = Instant::now();
        let mut circuits = self.circuits.lock().expect("circuit lock poisoned");
        match status {
            AttemptStatus::Blocked => {
                let circuit = circuits.entry(platform.to_string()).or_default();
                if circuit.open_until.is_some_and(|until| until > now) {
                    return false;
                }
                circuit.recent_blocks.push_back(now);
                circuit.prune(now, self.config.window);
                if circuit.recent_blocks.len() as u32 >= self.config.threshold.max(1) {
                    circuit.open_until = Some(now + self.config.cooldown);
                    circuit.recent_blocks.clear();
                    log::warn!(
                        "{platform}: circuit open for {:?} after repeated blocks",
                        self.config.cooldown
                    );
                    return true;
                }
                false
            }
            AttemptStatus::Available | AttemptStatus::Taken | AttemptStatus::Ambiguous => {
                if let Some(circuit) = circuits.get_mut(platform) {
                    circuit.recent_blocks.clear();
                }
                false
            }
            AttemptStatus::Error => false,
        }
    }

    /// Platforms whose circuit is currently open.
    pub fn open_circuits(&self) -> Vec<String> {
        let now = Instant::now();
        let circuits = self.circuits.lock().expect("circuit lock poisoned");
        let mut open: Vec<String> = circuits
            .iter()
            .filter(|(_, circuit)| circuit.open_until.is_some_and(|until| until > now))
            .map(|(platform, _)| platform.clone())
            .collect();
        open.sort();
        open
    }
}
