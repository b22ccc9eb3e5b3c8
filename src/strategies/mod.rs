//! Probing strategies.
//!
//! A strategy is one concrete way of asking a platform whether a username is
//! taken. Every variant shares the same contract: expected conditions
//! (timeouts, challenge pages, odd status codes) come back as an
//! [`AttemptOutcome`] with status `Error` or `Blocked`, while genuine
//! misconfiguration of the attempt surfaces as a [`StrategyError`].

pub mod api;
pub mod browser_light;
pub mod browser_stealth;
pub mod http_basic;
pub mod http_stealth;
#[cfg(test)]
pub(crate) mod test_support;

pub use api::{ApiStrategy, Credentials};
pub use browser_light::BrowserLightStrategy;
pub use browser_stealth::BrowserStealthStrategy;
pub use http_basic::HttpBasicStrategy;
pub use http_stealth::HttpStealthStrategy;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::detection::BlockDetector;
use crate::external_deps::browser::RenderRequest;
use crate::modules::proxy::ProxyEndpoint;
use crate::modules::spoofing::Fingerprint;
use crate::platforms::{PageInput, PlatformDescriptor};
use crate::report::duration_ms;
use crate::username::Username;

/// Strategy variants, ordered from cheapest to most expensive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    HttpBasic,
    HttpStealth,
    BrowserLight,
    BrowserStealth,
    Api,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 5] = [
        StrategyKind::HttpBasic,
        StrategyKind::HttpStealth,
        StrategyKind::BrowserLight,
        StrategyKind::BrowserStealth,
        StrategyKind::Api,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::HttpBasic => "http_basic",
            StrategyKind::HttpStealth => "http_stealth",
            StrategyKind::BrowserLight => "browser_light",
            StrategyKind::BrowserStealth => "browser_stealth",
            StrategyKind::Api => "api",
        }
    }

    /// Highest confidence the variant reports unless a platform overrides it.
    pub fn default_ceiling(self) -> f64 {
        match self {
            StrategyKind::HttpBasic => 0.7,
            StrategyKind::HttpStealth => 0.8,
            StrategyKind::BrowserLight => 0.9,
            StrategyKind::BrowserStealth => 0.97,
            StrategyKind::Api => 1.0,
        }
    }

    pub fn is_browser(self) -> bool {
        matches!(self, StrategyKind::BrowserLight | StrategyKind::BrowserStealth)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        StrategyKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| format!("unknown strategy `{value}`"))
    }
}

/// Verdict taxonomy shared by attempts and final results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Available,
    Taken,
    Ambiguous,
    Blocked,
    Error,
}

impl AttemptStatus {
    /// `Available` and `Taken` are the only statuses that can be accepted.
    pub fn is_definitive(self) -> bool {
        matches!(self, AttemptStatus::Available | AttemptStatus::Taken)
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AttemptStatus::Available => "available",
            AttemptStatus::Taken => "taken",
            AttemptStatus::Ambiguous => "ambiguous",
            AttemptStatus::Blocked => "blocked",
            AttemptStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// Diagnostic detail attached to an outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AttemptDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captcha_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captcha_passes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Result of a single strategy execution. Immutable once the engine has
/// stamped the elapsed time on it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptOutcome {
    pub strategy: StrategyKind,
    pub status: AttemptStatus,
    pub confidence: f64,
    #[serde(rename = "elapsed_ms", serialize_with = "duration_ms")]
    pub elapsed: Duration,
    /// Transient failure worth repeating with the same strategy.
    pub retryable: bool,
    pub detail: AttemptDetail,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl AttemptOutcome {
    pub fn new(strategy: StrategyKind, status: AttemptStatus, confidence: f64) -> Self {
        Self {
            strategy,
            status,
            confidence: clamp_confidence(confidence),
            elapsed: Duration::ZERO,
            retryable: false,
            detail: AttemptDetail::default(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn error(strategy: StrategyKind, message: impl Into<String>, retryable: bool) -> Self {
        let mut outcome = Self::new(strategy, AttemptStatus::Error, 0.0);
        outcome.retryable = retryable;
        outcome.detail.message = Some(message.into());
        outcome
    }

    pub fn blocked(strategy: StrategyKind, reason: impl Into<String>) -> Self {
        let mut outcome = Self::new(strategy, AttemptStatus::Blocked, 0.0);
        outcome.detail.message = Some(reason.into());
        outcome
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.detail.http_status = Some(status);
        self
    }

    pub fn with_matched(mut self, matched: impl Into<String>) -> Self {
        self.detail.matched = Some(matched.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = clamp_confidence(confidence);
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Accepted when definitive and at or above the threshold.
    pub fn is_accepted(&self, threshold: f64) -> bool {
        self.status.is_definitive() && self.confidence >= threshold
    }
}

pub(crate) fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

/// Execution context lent to a strategy for one attempt.
#[derive(Debug)]
pub struct AttemptContext<'a> {
    pub fingerprint: &'a Fingerprint,
    pub proxy: Option<&'a ProxyEndpoint>,
    pub deadline: Instant,
    pub captcha_enabled: bool,
    pub captcha_attempts: u32,
}

impl AttemptContext<'_> {
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn proxy_address(&self) -> Option<String> {
        self.proxy.map(|proxy| proxy.address.clone())
    }
}

/// Fail-fast faults that halt a single attempt.
#[derive(Debug, Clone, Error)]
pub enum StrategyError {
    #[error("platform {platform} is misconfigured: {reason}")]
    Misconfigured { platform: String, reason: String },
    #[error("probe url for {platform} is invalid: {source}")]
    InvalidUrl {
        platform: String,
        #[source]
        source: url::ParseError,
    },
}

/// Polymorphic probing capability.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn attempt(
        &self,
        username: &Username,
        platform: &PlatformDescriptor,
        ctx: &AttemptContext<'_>,
    ) -> Result<AttemptOutcome, StrategyError>;
}

/// Turns a fetched or rendered page into an outcome: anti-bot pages become
/// `Blocked`, server errors become retryable `Error`s, everything else goes
/// through the platform's parse rule capped at the strategy ceiling.
pub(crate) fn judge_page(
    kind: StrategyKind,
    platform: &PlatformDescriptor,
    username: &Username,
    page: PageInput<'_>,
) -> AttemptOutcome {
    if let Some(signal) = BlockDetector::detect(page.status, page.body, &platform.block_patterns) {
        log::debug!(
            "{} blocked {} via {} ({:.2})",
            platform.id,
            kind,
            signal.signature,
            signal.confidence
        );
        return AttemptOutcome::blocked(kind, signal.signature.clone())
            .with_http_status(page.status)
            .with_matched(signal.kind.as_str());
    }

    if page.status >= 500 {
        return AttemptOutcome::error(kind, format!("server error {}", page.status), true)
            .with_http_status(page.status);
    }

    let verdict = platform.parse.evaluate(&page, username);
    let ceiling = platform.ceiling(kind);
    let confidence = if verdict.status.is_definitive() {
        verdict.signal.min(ceiling)
    } else {
        verdict.signal.min(ceiling).min(0.5)
    };

    let mut outcome = AttemptOutcome::new(kind, verdict.status, confidence)
        .with_http_status(page.status)
        .with_matched(verdict.matched);

    if verdict.status == AttemptStatus::Taken {
        outcome.metadata = platform.capture_metadata(page.body);
    }
    outcome
}

/// Builds a render request carrying the attempt's fingerprint.
pub(crate) fn render_request(
    url: url::Url,
    ctx: &AttemptContext<'_>,
    stealth: bool,
) -> RenderRequest {
    let fingerprint = ctx.fingerprint;
    RenderRequest {
        url,
        user_agent: fingerprint.user_agent.clone(),
        headers: if stealth {
            fingerprint.headers.clone()
        } else {
            fingerprint.minimal_headers()
        },
        viewport: fingerprint.viewport,
        locale: fingerprint.locale.clone(),
        timezone: fingerprint.timezone.clone(),
        proxy: ctx.proxy_address(),
        stealth,
        timeout: ctx.remaining(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strategy_names() {
        assert_eq!("browser_stealth".parse::<StrategyKind>(), Ok(StrategyKind::BrowserStealth));
        assert!("selenium".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn acceptance_requires_definitive_status() {
        let taken = AttemptOutcome::new(StrategyKind::Api, AttemptStatus::Taken, 0.85);
        assert!(taken.is_accepted(0.8));
        assert!(!taken.is_accepted(0.9));

        let ambiguous = AttemptOutcome::new(StrategyKind::Api, AttemptStatus::Ambiguous, 1.0);
        assert!(!ambiguous.is_accepted(0.1));
    }

    #[test]
    fn confidence_is_clamped() {
        let outcome = AttemptOutcome::new(StrategyKind::HttpBasic, AttemptStatus::Taken, 1.4);
        assert_eq!(outcome.confidence, 1.0);
        assert_eq!(outcome.with_confidence(f64::NAN).confidence, 0.0);
    }
}
