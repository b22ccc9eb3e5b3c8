//! Settings and configuration module
//!
//! Provides unified configuration with:
//! - Engine-wide policy loaded from JSON
//! - Per-call resolve options with a fluent builder style

mod options;

pub use options::ResolveOptions;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::modules::circuit::CircuitConfig;
use crate::modules::timing::{Backoff, JitterRange};
use crate::username::UsernamePolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Engine-wide knobs. Every field has a default so partial JSON documents
/// are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnginePolicy {
    /// Minimum confidence for a definitive outcome to stop the chain.
    pub accept_threshold: f64,
    /// Extra attempts per strategy on transient failure.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub attempt_timeout_ms: u64,
    /// Concurrent Browser-Stealth attempts across the whole engine.
    pub browser_concurrency: usize,
    pub default_concurrency: usize,
    pub circuit_threshold: u32,
    pub circuit_window_ms: u64,
    pub circuit_cooldown_ms: u64,
    pub captcha_enabled: bool,
    pub captcha_attempts: u32,
    pub grace_period_ms: u64,
    pub stealth_jitter_min_ms: u64,
    pub stealth_jitter_max_ms: u64,
    /// Response bodies are truncated beyond this size.
    pub max_body_bytes: usize,
    pub username: UsernamePolicy,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            accept_threshold: 0.8,
            max_retries: 2,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
            attempt_timeout_ms: 15_000,
            browser_concurrency: 2,
            default_concurrency: 8,
            circuit_threshold: 5,
            circuit_window_ms: 60_000,
            circuit_cooldown_ms: 120_000,
            captcha_enabled: false,
            captcha_attempts: 3,
            grace_period_ms: 2_000,
            stealth_jitter_min_ms: 250,
            stealth_jitter_max_ms: 1_200,
            max_body_bytes: 2 * 1024 * 1024,
            username: UsernamePolicy::default(),
        }
    }
}

impl EnginePolicy {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let policy: Self = serde_json::from_str(raw)?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.accept_threshold) {
            return Err(ConfigError::Invalid(format!(
                "accept_threshold {} outside [0, 1]",
                self.accept_threshold
            )));
        }
        if self.browser_concurrency == 0 || self.default_concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency budgets must be positive".into()));
        }
        if self.attempt_timeout_ms == 0 {
            return Err(ConfigError::Invalid("attempt_timeout_ms must be positive".into()));
        }
        if self.circuit_threshold == 0 {
            return Err(ConfigError::Invalid("circuit_threshold must be positive".into()));
        }
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid("max_body_bytes must be positive".into()));
        }
        if self.captcha_attempts == 0 {
            return Err(ConfigError::Invalid("captcha_attempts must be positive".into()));
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(ConfigError::Invalid("backoff_max_ms below backoff_base_ms".into()));
        }
        if self.username.min_length == 0 || self.username.min_length > self.username.max_length {
            return Err(ConfigError::Invalid("username length bounds are inconsistent".into()));
        }
        Ok(())
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }

    pub fn stealth_jitter(&self) -> JitterRange {
        JitterRange::new(
            Duration::from_millis(self.stealth_jitter_min_ms),
            Duration::from_millis(self.stealth_jitter_max_ms),
        )
    }

    pub fn circuit(&self) -> CircuitConfig {
        CircuitConfig {
            threshold: self.circuit_threshold,
            window: Duration::from_millis(self.circuit_window_ms),
            cooldown: Duration::from_millis(self.circuit_cooldown_ms),
        }
    }
}

/// Reads and validates a policy file.
pub fn load_policy(path: impl AsRef<Path>) -> Result<EnginePolicy, ConfigError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    EnginePolicy::from_json_str(&raw)
}
