use std::collections::HashMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::strategies::StrategyKind;

/// Per-call options for `resolve` and `resolve_batch`. Unset fields fall
/// back to the platform descriptor, then to the engine policy.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Run only this strategy, ignoring the descriptor chain.
    pub strategy_override: Option<StrategyKind>,
    /// Replace the descriptor chain with this order.
    pub strategy_order: Option<Vec<StrategyKind>>,
    pub accept_threshold: Option<f64>,
    pub concurrency: Option<usize>,
    /// Minimum spacing per platform, replacing each descriptor's policy.
    pub rate_limit_override: Option<Duration>,
    /// Minimum spacing between any two attempts, across platforms.
    pub global_min_interval: Option<Duration>,
    pub captcha_enabled: Option<bool>,
    pub attempt_timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub cancellation: Option<CancellationToken>,
    /// Cancels the call once this much time has passed.
    pub deadline: Option<Duration>,
    pub grace_period: Option<Duration>,
    /// Per-platform rate-limit overrides keyed by platform id.
    pub platform_intervals: HashMap<String, Duration>,
    /// Egress endpoints for this call only; the engine's pool is used when
    /// empty.
    pub proxies: Vec<String>,
}

impl ResolveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy_override(mut self, kind: StrategyKind) -> Self {
        self.strategy_override = Some(kind);
        self
    }

    pub fn with_strategy_order(mut self, order: Vec<StrategyKind>) -> Self {
        self.strategy_order = Some(order);
        self
    }

    pub fn with_accept_threshold(mut self, threshold: f64) -> Self {
        self.accept_threshold = Some(threshold);
        self
    }

    pub fn with_concurrency(mut self, budget: usize) -> Self {
        self.concurrency = Some(budget);
        self
    }

    pub fn with_rate_limit(mut self, interval: Duration) -> Self {
        self.rate_limit_override = Some(interval);
        self
    }

    pub fn with_platform_interval(mut self, platform: impl Into<String>, interval: Duration) -> Self {
        self.platform_intervals.insert(platform.into(), interval);
        self
    }

    pub fn with_global_interval(mut self, interval: Duration) -> Self {
        self.global_min_interval = Some(interval);
        self
    }

    pub fn with_proxies<I, S>(mut self, proxies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.proxies = proxies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_captcha(mut self, enabled: bool) -> Self {
        self.captcha_enabled = Some(enabled);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_deadline(mut self, after: Duration) -> Self {
        self.deadline = Some(after);
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = Some(grace);
        self
    }

    /// Rate-limit interval for a platform, if the caller overrode it.
    pub fn interval_for(&self, platform: &str) -> Option<Duration> {
        self.platform_intervals
            .get(platform)
            .copied()
            .or(self.rate_limit_override)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if let Some(threshold) = self.accept_threshold
            && !(0.0..=1.0).contains(&threshold)
        {
            return Err(format!("accept threshold {threshold} outside [0, 1]"));
        }
        if self.concurrency == Some(0) {
            return Err("concurrency budget must be positive".into());
        }
        if self.attempt_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err("attempt timeout must be positive".into());
        }
        if self.strategy_order.as_ref().is_some_and(|order| order.is_empty()) {
            return Err("explicit strategy order is empty".into());
        }
        Ok(())
    }
}
