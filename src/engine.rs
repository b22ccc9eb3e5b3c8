//! Resolution engine.
//!
//! Runs the strategy fallback chain for one (username, platform) pair:
//! circuit check, per-attempt rate limiting, fresh fingerprint, proxy lease,
//! hard timeout, bounded retries with backoff, and acceptance against the
//! confidence threshold. Batches are fanned out by
//! [`BatchCoordinator`](crate::batch::BatchCoordinator).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{AcquireError, Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;
use tokio::time::{Instant, sleep};

use crate::batch::{BatchCoordinator, BatchReport};
use crate::config::{ConfigError, EnginePolicy, ResolveOptions};
use crate::external_deps::browser::{PageRenderer, StaticPageRenderer};
use crate::external_deps::captcha::CaptchaSolver;
use crate::modules::circuit::CircuitBreaker;
use crate::modules::events::{
    AttemptFinishedEvent, AttemptStartedEvent, CircuitEvent, EngineEvent, EventDispatcher,
    EventHandler, LoggingHandler, MetricsHandler, ResolvedEvent, RetryEvent,
};
use crate::modules::metrics::{MetricsCollector, MetricsSnapshot};
use crate::modules::proxy::{ProxyConfig, ProxyFeedback, ProxyHealthReport, ProxyPool};
use crate::modules::rate_limit::RateLimiter;
use crate::modules::spoofing::{FingerprintGenerator, FingerprintProvider};
use crate::modules::timing::Backoff;
use crate::platforms::{PlatformDescriptor, PlatformRegistry, RegistryError};
use crate::report::{CheckReport, PlatformResult};
use crate::strategies::{
    ApiStrategy, AttemptContext, AttemptOutcome, AttemptStatus, BrowserLightStrategy,
    BrowserStealthStrategy, Credentials, HttpBasicStrategy, HttpStealthStrategy, Strategy,
    StrategyKind, clamp_confidence,
};
use crate::transport::{ProbeHttpClient, ReqwestProbeClient, TransportError};
use crate::username::{Username, UsernameError};

/// Result alias used across the orchestration layer.
pub type EngineResult<T> = Result<T, EngineError>;

/// Configuration-time faults, reported before any network activity.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid username `{raw}`: {source}")]
    Username {
        raw: String,
        #[source]
        source: UsernameError,
    },
    #[error("platform registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("transport initialisation failed: {0}")]
    Transport(#[from] TransportError),
    #[error("{strategy} cannot run for {platform}: {reason}")]
    StrategyUnavailable {
        platform: String,
        strategy: StrategyKind,
        reason: String,
    },
    #[error("no platforms selected")]
    NoPlatforms,
    #[error("invalid options: {0}")]
    InvalidOptions(String),
}

/// Point-in-time view of the engine's shared state.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub metrics: MetricsSnapshot,
    pub proxies: ProxyHealthReport,
    pub open_circuits: Vec<String>,
}

/// Builder for [`ResolutionEngine`].
pub struct EngineBuilder {
    registry: Option<PlatformRegistry>,
    policy: EnginePolicy,
    http_client: Option<Arc<dyn ProbeHttpClient>>,
    renderer: Option<Arc<dyn PageRenderer>>,
    captcha_solver: Option<Arc<dyn CaptchaSolver>>,
    fingerprints: Option<Arc<dyn FingerprintProvider>>,
    proxies: Vec<String>,
    proxy_config: ProxyConfig,
    credentials: Credentials,
    strategies: Vec<Arc<dyn Strategy>>,
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            registry: None,
            policy: EnginePolicy::default(),
            http_client: None,
            renderer: None,
            captcha_solver: None,
            fingerprints: None,
            proxies: Vec::new(),
            proxy_config: ProxyConfig::default(),
            credentials: Credentials::new(),
            strategies: Vec::new(),
            handlers: Vec::new(),
        }
    }

    pub fn with_registry(mut self, registry: PlatformRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_policy(mut self, policy: EnginePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_http_client(mut self, client: Arc<dyn ProbeHttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_captcha_solver(mut self, solver: Arc<dyn CaptchaSolver>) -> Self {
        self.captcha_solver = Some(solver);
        self
    }

    pub fn with_fingerprint_provider(mut self, provider: Arc<dyn FingerprintProvider>) -> Self {
        self.fingerprints = Some(provider);
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

    pub fn with_proxy_config(mut self, config: ProxyConfig) -> Self {
        self.proxy_config = config;
        self
    }

    pub fn with_credential(mut self, key: impl Into<String>, secret: impl Into<String>) -> Self {
        self.credentials.insert(key, secret);
        self
    }

    /// Replaces the built-in implementation of `strategy.kind()`.
    pub fn with_strategy(mut self, strategy: Arc<dyn Strategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn build(self) -> EngineResult<ResolutionEngine> {
        self.policy.validate()?;
        let registry = match self.registry {
            Some(registry) => registry,
            None => PlatformRegistry::builtin()?,
        };
        let http_client: Arc<dyn ProbeHttpClient> = match self.http_client {
            Some(client) => client,
            None => Arc::new(
                ReqwestProbeClient::new()?.with_max_body_bytes(self.policy.max_body_bytes),
            ),
        };
        let renderer = self
            .renderer
            .unwrap_or_else(|| Arc::new(StaticPageRenderer::new(http_client.clone())));

        let mut stealth_browser = BrowserStealthStrategy::new(renderer.clone());
        if let Some(solver) = self.captcha_solver {
            stealth_browser = stealth_browser.with_solver(solver);
        }
        let built_in: [Arc<dyn Strategy>; 5] = [
            Arc::new(HttpBasicStrategy::new(http_client.clone())),
            Arc::new(
                HttpStealthStrategy::new(http_client.clone())
                    .with_jitter(self.policy.stealth_jitter()),
            ),
            Arc::new(BrowserLightStrategy::new(renderer)),
            Arc::new(stealth_browser),
            Arc::new(ApiStrategy::new(http_client, self.credentials.clone())),
        ];
        let mut strategies: HashMap<StrategyKind, Arc<dyn Strategy>> = HashMap::new();
        for strategy in built_in.into_iter().chain(self.strategies) {
            strategies.insert(strategy.kind(), strategy);
        }

        let metrics = MetricsCollector::new();
        let mut events = EventDispatcher::new();
        events.register_handler(Arc::new(LoggingHandler));
        events.register_handler(Arc::new(MetricsHandler::new(metrics.clone())));
        for handler in self.handlers {
            events.register_handler(handler);
        }

        let proxies = Arc::new(ProxyPool::new(self.proxies, self.proxy_config.clone()));
        let inner = EngineInner {
            registry,
            backoff: self.policy.backoff(),
            circuit: CircuitBreaker::new(self.policy.circuit()),
            browser_permits: Semaphore::new(self.policy.browser_concurrency),
            policy: self.policy,
            strategies,
            credentials: self.credentials,
            fingerprints: self
                .fingerprints
                .unwrap_or_else(|| Arc::new(FingerprintGenerator::default())),
            proxies,
            proxy_config: self.proxy_config,
            rate_limiter: RateLimiter::new(),
            events,
            metrics,
        };
        Ok(ResolutionEngine {
            inner: Arc::new(inner),
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared by every task of every call.
struct EngineInner {
    registry: PlatformRegistry,
    policy: EnginePolicy,
    backoff: Backoff,
    strategies: HashMap<StrategyKind, Arc<dyn Strategy>>,
    credentials: Credentials,
    fingerprints: Arc<dyn FingerprintProvider>,
    proxies: Arc<ProxyPool>,
    proxy_config: ProxyConfig,
    rate_limiter: RateLimiter,
    circuit: CircuitBreaker,
    browser_permits: Semaphore,
    events: EventDispatcher,
    metrics: MetricsCollector,
}

/// Attempts recorded so far for one pair; read back when the pair is
/// abandoned on cancellation.
#[derive(Debug, Default, Clone)]
pub(crate) struct AttemptTrace(Arc<Mutex<Vec<AttemptOutcome>>>);

impl AttemptTrace {
    fn push(&self, outcome: AttemptOutcome) {
        self.0.lock().expect("trace lock poisoned").push(outcome);
    }

    pub(crate) fn snapshot(&self) -> Vec<AttemptOutcome> {
        self.0.lock().expect("trace lock poisoned").clone()
    }
}

/// Options resolved against the policy for one call.
pub(crate) struct CallPlan {
    options: ResolveOptions,
    default_threshold: f64,
    proxies: Arc<ProxyPool>,
    attempt_timeout: Duration,
    max_retries: u32,
    captcha_enabled: bool,
    pub(crate) concurrency: usize,
    pub(crate) grace_period: Duration,
}

impl CallPlan {
    fn chain_for(&self, platform: &PlatformDescriptor) -> Vec<StrategyKind> {
        if let Some(kind) = self.options.strategy_override {
            return vec![kind];
        }
        if let Some(order) = &self.options.strategy_order {
            return order.clone();
        }
        platform.strategies.clone()
    }

    pub(crate) fn threshold_for(&self, platform: &PlatformDescriptor) -> f64 {
        self.options
            .accept_threshold
            .or(platform.min_confidence)
            .unwrap_or(self.default_threshold)
    }

    fn interval_for(&self, platform: &PlatformDescriptor) -> Duration {
        self.options
            .interval_for(&platform.id)
            .unwrap_or_else(|| platform.rate_limit.min_interval())
    }
}

/// Validated inputs of one call.
pub(crate) struct PreparedCall {
    pub(crate) usernames: Vec<Username>,
    pub(crate) platforms: Vec<Arc<PlatformDescriptor>>,
    pub(crate) plan: CallPlan,
}

/// Concurrent, rate-limited username resolution across platforms.
#[derive(Clone)]
pub struct ResolutionEngine {
    inner: Arc<EngineInner>,
}

impl ResolutionEngine {
    /// Engine over the built-in catalog and the reqwest transport.
    pub fn new() -> EngineResult<Self> {
        EngineBuilder::new().build()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn registry(&self) -> &PlatformRegistry {
        &self.inner.registry
    }

    pub fn policy(&self) -> &EnginePolicy {
        &self.inner.policy
    }

    /// Resolves one username on each of `platforms`.
    pub async fn resolve<S: AsRef<str>>(
        &self,
        username: &str,
        platforms: &[S],
        options: &ResolveOptions,
    ) -> EngineResult<CheckReport> {
        let batch = self.resolve_batch(&[username], platforms, options).await?;
        batch
            .reports
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::InvalidOptions("no report produced".into()))
    }

    /// Resolves every username × platform pair under the call's budget.
    pub async fn resolve_batch<U: AsRef<str>, P: AsRef<str>>(
        &self,
        usernames: &[U],
        platforms: &[P],
        options: &ResolveOptions,
    ) -> EngineResult<BatchReport> {
        BatchCoordinator::new(self.clone())
            .run(usernames, platforms, options)
            .await
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn proxy_health(&self) -> ProxyHealthReport {
        self.inner.proxies.health_report()
    }

    pub fn open_circuits(&self) -> Vec<String> {
        self.inner.circuit.open_circuits()
    }

    pub fn system_status(&self) -> SystemStatus {
        SystemStatus {
            metrics: self.metrics_snapshot(),
            proxies: self.proxy_health(),
            open_circuits: self.open_circuits(),
        }
    }

    /// Performs every fatal check so that a call either fails before any
    /// network activity or runs to completion.
    pub(crate) fn prepare<U: AsRef<str>, P: AsRef<str>>(
        &self,
        usernames: &[U],
        platforms: &[P],
        options: &ResolveOptions,
    ) -> EngineResult<PreparedCall> {
        options.validate().map_err(EngineError::InvalidOptions)?;
        if platforms.is_empty() {
            return Err(EngineError::NoPlatforms);
        }

        let policy = &self.inner.policy;
        let usernames = usernames
            .iter()
            .map(|raw| {
                Username::parse(raw.as_ref(), &policy.username).map_err(|source| {
                    EngineError::Username {
                        raw: raw.as_ref().to_string(),
                        source,
                    }
                })
            })
            .collect::<EngineResult<Vec<_>>>()?;
        let platforms = self.inner.registry.select(platforms)?;

        for platform in &platforms {
            self.check_api_requirements(platform, options)?;
        }

        let proxies = if options.proxies.is_empty() {
            Arc::clone(&self.inner.proxies)
        } else {
            Arc::new(ProxyPool::new(
                options.proxies.iter().cloned(),
                self.inner.proxy_config.clone(),
            ))
        };
        let plan = CallPlan {
            default_threshold: policy.accept_threshold,
            proxies,
            attempt_timeout: options
                .attempt_timeout
                .unwrap_or_else(|| policy.attempt_timeout()),
            max_retries: options.max_retries.unwrap_or(policy.max_retries),
            captcha_enabled: options.captcha_enabled.unwrap_or(policy.captcha_enabled),
            concurrency: options.concurrency.unwrap_or(policy.default_concurrency),
            grace_period: options.grace_period.unwrap_or_else(|| policy.grace_period()),
            options: options.clone(),
        };
        Ok(PreparedCall {
            usernames,
            platforms,
            plan,
        })
    }

    /// API credentials are only mandatory when the caller explicitly asked
    /// for the API strategy; descriptor chains fall back instead.
    fn check_api_requirements(
        &self,
        platform: &PlatformDescriptor,
        options: &ResolveOptions,
    ) -> EngineResult<()> {
        let unavailable = |reason: String| EngineError::StrategyUnavailable {
            platform: platform.id.clone(),
            strategy: StrategyKind::Api,
            reason,
        };
        let forced = options.strategy_override == Some(StrategyKind::Api);
        let ordered = options
            .strategy_order
            .as_ref()
            .is_some_and(|order| order.contains(&StrategyKind::Api));
        if !forced && !ordered {
            return Ok(());
        }

        match &platform.api {
            None if forced => Err(unavailable("platform has no api endpoint".into())),
            None => Ok(()),
            Some(endpoint) if !self.inner.credentials.contains(&endpoint.credential) => Err(
                unavailable(format!("credential `{}` is not configured", endpoint.credential)),
            ),
            Some(_) => Ok(()),
        }
    }

    /// Produces the single result for one pair. Attempts are recorded in
    /// `trace` as they finish. Once `cancel` fires no further strategy or
    /// retry is started and the pair resolves from what it has.
    pub(crate) async fn resolve_pair(
        &self,
        username: &Username,
        platform: &PlatformDescriptor,
        plan: &CallPlan,
        trace: &AttemptTrace,
        cancel: &CancellationToken,
    ) -> PlatformResult {
        let started = Instant::now();

        if let Some(remaining) = self.inner.circuit.open_for(&platform.id) {
            self.dispatch(EngineEvent::ShortCircuited(CircuitEvent {
                platform: platform.id.clone(),
                cooldown: remaining,
                timestamp: Utc::now(),
            }));
            return self.finish(username, PlatformResult::short_circuited(platform, remaining));
        }

        if let Some(max_length) = platform.max_length
            && !platform.accepts_length(username)
        {
            return self.finish(username, PlatformResult::rejected_by_platform(platform, max_length));
        }

        let threshold = plan.threshold_for(platform);
        let mut interrupted = false;
        'chain: for kind in plan.chain_for(platform) {
            if cancel.is_cancelled() {
                interrupted = true;
                break;
            }
            let Some(strategy) = self.inner.strategies.get(&kind).cloned() else {
                trace.push(AttemptOutcome::error(kind, "strategy not registered", false));
                continue;
            };

            let mut retry = 0;
            loop {
                let Some(outcome) = self
                    .run_attempt(strategy.as_ref(), username, platform, plan, retry + 1, cancel)
                    .await
                else {
                    interrupted = true;
                    break 'chain;
                };
                let accepted = outcome.is_accepted(threshold);
                let retryable = outcome.status == AttemptStatus::Error && outcome.retryable;
                let reason = outcome.detail.message.clone().unwrap_or_default();
                trace.push(outcome);

                if accepted {
                    break 'chain;
                }
                if !retryable || retry >= plan.max_retries {
                    break;
                }

                let delay = self.inner.backoff.delay_for(retry);
                retry += 1;
                self.dispatch(EngineEvent::Retry(RetryEvent {
                    platform: platform.id.clone(),
                    strategy: kind,
                    attempt: retry + 1,
                    reason,
                    scheduled_after: delay,
                    timestamp: Utc::now(),
                }));
                let cancelled = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => true,
                    _ = sleep(delay) => false,
                };
                if cancelled {
                    interrupted = true;
                    break 'chain;
                }
            }
        }

        let result = PlatformResult::resolve(platform, trace.snapshot(), threshold, started.elapsed());
        if interrupted {
            log::info!("{}: chain for @{} stopped by cancellation", platform.id, username);
            return self.finish(username, cancelled_result(result));
        }
        self.finish(username, result)
    }

    /// Result for a pair abandoned after the cancellation grace period.
    pub(crate) fn abandon(
        &self,
        username: &Username,
        platform: &PlatformDescriptor,
        plan: &CallPlan,
        trace: &AttemptTrace,
        elapsed: Duration,
    ) -> PlatformResult {
        log::warn!("{}: abandoning @{} after cancellation", platform.id, username);
        let result =
            PlatformResult::resolve(platform, trace.snapshot(), plan.threshold_for(platform), elapsed);
        self.finish(username, cancelled_result(result))
    }

    /// Waits for the platform's rate-limit slot and, for Browser-Stealth, a
    /// browser permit. A permit is never held while sleeping on a rate limit.
    async fn admit(
        &self,
        kind: StrategyKind,
        platform: &PlatformDescriptor,
        plan: &CallPlan,
    ) -> Result<Option<SemaphorePermit<'_>>, AcquireError> {
        let limiter = &self.inner.rate_limiter;
        let interval = plan.interval_for(platform);
        let global = plan.options.global_min_interval;
        if kind != StrategyKind::BrowserStealth {
            limiter.wait(&platform.id, interval, global).await;
            return Ok(None);
        }
        loop {
            limiter.ready(&platform.id, global.is_some()).await;
            let permit = self.inner.browser_permits.acquire().await?;
            if limiter.try_reserve(&platform.id, interval, global) {
                return Ok(Some(permit));
            }
        }
    }

    /// Runs one attempt. Returns `None` when `cancel` fires before the
    /// attempt could start.
    async fn run_attempt(
        &self,
        strategy: &dyn Strategy,
        username: &Username,
        platform: &PlatformDescriptor,
        plan: &CallPlan,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Option<AttemptOutcome> {
        let kind = strategy.kind();
        let _browser_permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            admitted = self.admit(kind, platform, plan) => match admitted {
                Ok(permit) => permit,
                Err(_) => return Some(AttemptOutcome::error(kind, "browser budget closed", false)),
            },
        };

        let fingerprint = self.inner.fingerprints.generate();
        let lease = plan.proxies.acquire();
        let proxy = lease.as_ref().map(|lease| lease.endpoint.address.clone());
        self.dispatch(EngineEvent::AttemptStarted(AttemptStartedEvent {
            platform: platform.id.clone(),
            username: username.to_string(),
            strategy: kind,
            attempt,
            proxy: proxy.clone(),
            timestamp: Utc::now(),
        }));

        let started = Instant::now();
        let ctx = AttemptContext {
            fingerprint: &fingerprint,
            proxy: lease.as_ref().map(|lease| &lease.endpoint),
            deadline: started + plan.attempt_timeout,
            captcha_enabled: plan.captcha_enabled,
            captcha_attempts: self.inner.policy.captcha_attempts,
        };
        let result =
            tokio::time::timeout(plan.attempt_timeout, strategy.attempt(username, platform, &ctx))
                .await;
        let elapsed = started.elapsed();

        let mut outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                log::error!("{} via {kind}: {err}", platform.id);
                AttemptOutcome::error(kind, err.to_string(), false)
            }
            Err(_) => AttemptOutcome::error(
                kind,
                format!("attempt timed out after {:?}", plan.attempt_timeout),
                true,
            ),
        };
        outcome.elapsed = elapsed;
        outcome.confidence = clamp_confidence(outcome.confidence * platform.trust_weight);
        if outcome.detail.proxy.is_none() {
            outcome.detail.proxy = proxy;
        }

        if let Some(lease) = lease {
            let feedback = match outcome.status {
                AttemptStatus::Blocked => ProxyFeedback::Blocked,
                AttemptStatus::Error if outcome.retryable => ProxyFeedback::Failure,
                _ => ProxyFeedback::Success { latency: elapsed },
            };
            plan.proxies.release(lease, feedback);
        }

        if self.inner.circuit.record(&platform.id, outcome.status) {
            self.dispatch(EngineEvent::CircuitOpened(CircuitEvent {
                platform: platform.id.clone(),
                cooldown: self.inner.circuit.config().cooldown,
                timestamp: Utc::now(),
            }));
        }

        self.dispatch(EngineEvent::AttemptFinished(AttemptFinishedEvent {
            platform: platform.id.clone(),
            username: username.to_string(),
            strategy: kind,
            status: outcome.status,
            confidence: outcome.confidence,
            latency: elapsed,
            timestamp: Utc::now(),
        }));
        Some(outcome)
    }

    fn finish(&self, username: &Username, result: PlatformResult) -> PlatformResult {
        self.dispatch(EngineEvent::Resolved(ResolvedEvent {
            platform: result.platform.clone(),
            username: username.to_string(),
            status: result.status,
            strategy: result.strategy,
            confidence: result.confidence,
            accepted: result.accepted,
            short_circuited: result.short_circuited,
            elapsed: result.elapsed,
            timestamp: Utc::now(),
        }));
        result
    }

    fn dispatch(&self, event: EngineEvent) {
        self.inner.events.dispatch(event);
    }
}

fn cancelled_result(mut result: PlatformResult) -> PlatformResult {
    result.needs_retry = true;
    if result.attempts > 0 {
        result.detail.message = Some("cancelled before the chain finished".into());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::{ApiEndpoint, ParseRule, PlatformSpec};
    use crate::strategies::test_support::{ScriptedClient, response};

    fn registry() -> PlatformRegistry {
        let github = PlatformSpec::new(
            "github",
            "https://github.com/{username}",
            vec![StrategyKind::HttpBasic, StrategyKind::Api],
            ParseRule::status_code(),
        )
        .with_min_interval(Duration::ZERO)
        .with_api(ApiEndpoint {
            url_template: "https://api.github.com/users/{username}".into(),
            credential: "github_token".into(),
            header: "authorization".into(),
            scheme: "Bearer".into(),
            parse: ParseRule::json_field("/id"),
        });
        let mut short = PlatformSpec::new(
            "short",
            "https://short.example/{username}",
            vec![StrategyKind::HttpBasic],
            ParseRule::status_code(),
        )
        .with_min_interval(Duration::ZERO);
        short.max_length = Some(4);
        PlatformRegistry::from_specs([github, short]).unwrap()
    }

    fn engine(client: Arc<ScriptedClient>) -> ResolutionEngine {
        ResolutionEngine::builder()
            .with_registry(registry())
            .with_http_client(client)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn forced_api_without_credential_is_fatal() {
        let client = Arc::new(ScriptedClient::new([]));
        let engine = engine(client.clone());
        let options = ResolveOptions::new().with_strategy_override(StrategyKind::Api);

        let err = engine.resolve("octocat", &["github"], &options).await.unwrap_err();
        assert!(matches!(err, EngineError::StrategyUnavailable { .. }));
        assert_eq!(client.request_count(), 0);
    }

    #[tokio::test]
    async fn descriptor_chain_without_credential_falls_back() {
        let client = Arc::new(ScriptedClient::new([Ok(response(200, "<h1>octocat</h1>"))]));
        let engine = engine(client);
        let options = ResolveOptions::new().with_accept_threshold(0.9);

        let report = engine.resolve("octocat", &["github"], &options).await.unwrap();
        let github = report.result("github").unwrap();
        assert_eq!(github.attempts, 2);
        // HTTP-Basic caps at 0.7; the API attempt errors without a credential.
        assert_eq!(github.status, AttemptStatus::Taken);
        assert!(github.low_confidence);
    }

    #[tokio::test]
    async fn overlong_username_is_rejected_without_network() {
        let client = Arc::new(ScriptedClient::new([]));
        let engine = engine(client.clone());

        let report = engine
            .resolve("toolong", &["short"], &ResolveOptions::new())
            .await
            .unwrap();
        let short = report.result("short").unwrap();
        assert_eq!(short.status, AttemptStatus::Error);
        assert_eq!(short.detail.matched.as_deref(), Some(crate::report::USERNAME_REJECTED));
        assert_eq!(client.request_count(), 0);
    }

    #[tokio::test]
    async fn invalid_inputs_fail_before_network() {
        let client = Arc::new(ScriptedClient::new([]));
        let engine = engine(client.clone());
        let options = ResolveOptions::new();

        assert!(matches!(
            engine.resolve("bad name!", &["github"], &options).await,
            Err(EngineError::Username { .. })
        ));
        assert!(matches!(
            engine.resolve("octocat", &["myspace"], &options).await,
            Err(EngineError::Registry(RegistryError::UnknownPlatform(_)))
        ));
        assert!(matches!(
            engine.resolve("octocat", &[] as &[&str], &options).await,
            Err(EngineError::NoPlatforms)
        ));
        assert_eq!(client.request_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_with_backoff() {
        let client = Arc::new(ScriptedClient::new([
            Err(TransportError::Connect("reset".into())),
            Ok(response(503, "")),
            Ok(response(404, "")),
        ]));
        let engine = engine(client.clone());
        let options = ResolveOptions::new()
            .with_strategy_override(StrategyKind::HttpBasic)
            .with_accept_threshold(0.7);

        let report = engine.resolve("ghost", &["github"], &options).await.unwrap();
        let github = report.result("github").unwrap();
        assert_eq!(github.status, AttemptStatus::Available);
        assert_eq!(github.attempts, 3);
        assert_eq!(client.request_count(), 3);

        let status = engine.system_status();
        assert_eq!(status.metrics.global.total_attempts, 3);
        assert_eq!(status.metrics.global.errors, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_skips_the_retry() {
        let client = Arc::new(ScriptedClient::new([
            Err(TransportError::Connect("reset".into())),
            Ok(response(404, "")),
        ]));
        let engine = engine(client.clone());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let options = ResolveOptions::new()
            .with_strategy_override(StrategyKind::HttpBasic)
            .with_cancellation(cancel);

        let report = engine.resolve("ghost", &["github"], &options).await.unwrap();
        let github = report.result("github").unwrap();
        assert_eq!(client.request_count(), 1);
        assert_eq!(github.attempts, 1);
        assert_eq!(github.status, AttemptStatus::Error);
        assert!(github.needs_retry);
    }
}
