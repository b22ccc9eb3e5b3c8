use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use handlescan_rs::{
    AttemptContext, AttemptOutcome, AttemptStatus, EngineError, EnginePolicy, ParseRule,
    PlatformDescriptor, PlatformRegistry, PlatformSpec, ProbeHttpClient, ProbeRequest,
    ProbeResponse, ResolutionEngine, ResolveOptions, Strategy, StrategyError, StrategyKind,
    TransportError, Username,
};
use http::HeaderMap;

/// Answers every request through a routing closure and counts calls.
struct RoutedClient<F> {
    route: F,
    calls: AtomicUsize,
}

impl<F> RoutedClient<F> {
    fn new(route: F) -> Arc<Self> {
        Arc::new(Self {
            route,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<F> ProbeHttpClient for RoutedClient<F>
where
    F: Fn(&ProbeRequest) -> (u16, String) + Send + Sync,
{
    async fn fetch(&self, request: ProbeRequest) -> Result<ProbeResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (status, body) = (self.route)(&request);
        Ok(ProbeResponse {
            status,
            headers: HeaderMap::new(),
            body: Bytes::from(body),
            url: request.url,
        })
    }
}

/// Strategy double that replays queued outcomes.
struct ScriptedStrategy {
    kind: StrategyKind,
    outcomes: Mutex<VecDeque<AttemptOutcome>>,
    calls: AtomicUsize,
}

impl ScriptedStrategy {
    fn new(kind: StrategyKind, outcomes: impl IntoIterator<Item = AttemptOutcome>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Strategy for ScriptedStrategy {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    async fn attempt(
        &self,
        _username: &Username,
        _platform: &PlatformDescriptor,
        _ctx: &AttemptContext<'_>,
    ) -> Result<AttemptOutcome, StrategyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.outcomes.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| AttemptOutcome::error(self.kind, "script exhausted", false)))
    }
}

fn examplesite() -> PlatformRegistry {
    let spec = PlatformSpec::new(
        "examplesite",
        "https://examplesite.test/{username}",
        vec![StrategyKind::HttpBasic, StrategyKind::BrowserStealth],
        ParseRule::status_code(),
    )
    .with_min_interval(Duration::ZERO);
    PlatformRegistry::from_specs([spec]).unwrap()
}

fn unused_client() -> Arc<RoutedClient<impl Fn(&ProbeRequest) -> (u16, String) + Send + Sync>> {
    RoutedClient::new(|_: &ProbeRequest| (500, String::new()))
}

#[tokio::test(start_paused = true)]
async fn github_status_codes_resolve_with_basic_http() {
    let client = RoutedClient::new(|request: &ProbeRequest| match request.url.path() {
        "/admin" => (200, "<html><title>admin</title></html>".to_string()),
        _ => (404, "Not Found".to_string()),
    });
    let engine = ResolutionEngine::builder()
        .with_http_client(client.clone())
        .build()
        .unwrap();

    let report = engine
        .resolve("xq9-unlikely-handle", &["github"], &ResolveOptions::new())
        .await
        .unwrap();
    let github = report.result("github").unwrap();
    assert_eq!(github.status, AttemptStatus::Available);
    assert!(github.confidence >= 0.9);
    assert!(github.accepted);
    assert_eq!(github.strategy, Some(StrategyKind::HttpBasic));

    let report = engine
        .resolve("admin", &["github"], &ResolveOptions::new())
        .await
        .unwrap();
    let github = report.result("github").unwrap();
    assert_eq!(github.status, AttemptStatus::Taken);
    assert!(github.confidence >= 0.9);
    assert_eq!(client.calls(), 2);
}

#[tokio::test]
async fn blocked_basic_escalates_to_stealth_browser() {
    let basic = ScriptedStrategy::new(
        StrategyKind::HttpBasic,
        [AttemptOutcome::blocked(StrategyKind::HttpBasic, "cloudflare_js")],
    );
    let stealth = ScriptedStrategy::new(
        StrategyKind::BrowserStealth,
        [AttemptOutcome::new(StrategyKind::BrowserStealth, AttemptStatus::Available, 0.9)],
    );
    let engine = ResolutionEngine::builder()
        .with_registry(examplesite())
        .with_http_client(unused_client())
        .with_strategy(basic.clone())
        .with_strategy(stealth.clone())
        .build()
        .unwrap();

    let report = engine
        .resolve("ghost", &["examplesite"], &ResolveOptions::new())
        .await
        .unwrap();
    let result = report.result("examplesite").unwrap();
    assert_eq!(result.status, AttemptStatus::Available);
    assert_eq!(result.strategy, Some(StrategyKind::BrowserStealth));
    assert!((result.confidence - 0.9).abs() < 1e-9);
    assert_eq!(result.attempts, 2);
    assert_eq!(result.history[0].status, AttemptStatus::Blocked);
    assert_eq!((basic.calls(), stealth.calls()), (1, 1));
}

#[tokio::test]
async fn accepted_outcome_ends_the_chain() {
    let basic = ScriptedStrategy::new(
        StrategyKind::HttpBasic,
        [AttemptOutcome::new(StrategyKind::HttpBasic, AttemptStatus::Taken, 0.95)],
    );
    let stealth = ScriptedStrategy::new(StrategyKind::BrowserStealth, []);
    let engine = ResolutionEngine::builder()
        .with_registry(examplesite())
        .with_http_client(unused_client())
        .with_strategy(basic)
        .with_strategy(stealth.clone())
        .build()
        .unwrap();

    let report = engine
        .resolve("ghost", &["examplesite"], &ResolveOptions::new())
        .await
        .unwrap();
    let result = report.result("examplesite").unwrap();
    assert_eq!(result.status, AttemptStatus::Taken);
    assert_eq!(result.attempts, 1);
    assert_eq!(stealth.calls(), 0);
}

#[tokio::test]
async fn exhausted_chain_reports_best_low_confidence_outcome() {
    let basic = ScriptedStrategy::new(
        StrategyKind::HttpBasic,
        [AttemptOutcome::new(StrategyKind::HttpBasic, AttemptStatus::Ambiguous, 0.4)],
    );
    let stealth = ScriptedStrategy::new(
        StrategyKind::BrowserStealth,
        [AttemptOutcome::blocked(StrategyKind::BrowserStealth, "captcha unsolved")],
    );
    let engine = ResolutionEngine::builder()
        .with_registry(examplesite())
        .with_http_client(unused_client())
        .with_strategy(basic)
        .with_strategy(stealth)
        .build()
        .unwrap();

    let report = engine
        .resolve("ghost", &["examplesite"], &ResolveOptions::new())
        .await
        .unwrap();
    let result = report.result("examplesite").unwrap();
    assert_eq!(result.status, AttemptStatus::Ambiguous);
    assert!(result.low_confidence);
    assert!(result.needs_retry);
    assert!(report.recommendations.iter().any(|line| line == "Retry examplesite"));
}

#[tokio::test(start_paused = true)]
async fn transient_errors_retry_with_exponential_backoff() {
    let basic = ScriptedStrategy::new(
        StrategyKind::HttpBasic,
        [
            AttemptOutcome::error(StrategyKind::HttpBasic, "connection reset", true),
            AttemptOutcome::error(StrategyKind::HttpBasic, "connection reset", true),
            AttemptOutcome::new(StrategyKind::HttpBasic, AttemptStatus::Available, 0.9),
        ],
    );
    let stealth = ScriptedStrategy::new(StrategyKind::BrowserStealth, []);
    let engine = ResolutionEngine::builder()
        .with_registry(examplesite())
        .with_http_client(unused_client())
        .with_strategy(basic.clone())
        .with_strategy(stealth.clone())
        .build()
        .unwrap();

    let started = tokio::time::Instant::now();
    let report = engine
        .resolve("ghost", &["examplesite"], &ResolveOptions::new())
        .await
        .unwrap();
    let result = report.result("examplesite").unwrap();
    assert_eq!(result.status, AttemptStatus::Available);
    assert_eq!(result.attempts, 3);
    assert_eq!(basic.calls(), 3);
    assert_eq!(stealth.calls(), 0);
    // 500ms then 1s, each within 12.5% jitter.
    assert!(started.elapsed() >= Duration::from_millis(1300));
}

#[tokio::test]
async fn retries_stop_at_the_configured_limit() {
    let basic = ScriptedStrategy::new(
        StrategyKind::HttpBasic,
        std::iter::repeat_with(|| {
            AttemptOutcome::error(StrategyKind::HttpBasic, "connection reset", true)
        })
        .take(5),
    );
    let stealth = ScriptedStrategy::new(
        StrategyKind::BrowserStealth,
        [AttemptOutcome::new(StrategyKind::BrowserStealth, AttemptStatus::Taken, 0.97)],
    );
    let policy = EnginePolicy {
        max_retries: 1,
        backoff_base_ms: 1,
        backoff_max_ms: 1,
        ..EnginePolicy::default()
    };
    let engine = ResolutionEngine::builder()
        .with_registry(examplesite())
        .with_policy(policy)
        .with_http_client(unused_client())
        .with_strategy(basic.clone())
        .with_strategy(stealth)
        .build()
        .unwrap();

    let report = engine
        .resolve("ghost", &["examplesite"], &ResolveOptions::new())
        .await
        .unwrap();
    assert_eq!(basic.calls(), 2);
    assert_eq!(report.result("examplesite").unwrap().status, AttemptStatus::Taken);
}

#[tokio::test]
async fn forcing_api_without_credential_fails_before_network() {
    let client = unused_client();
    let engine = ResolutionEngine::builder()
        .with_http_client(client.clone())
        .build()
        .unwrap();
    let options = ResolveOptions::new().with_strategy_override(StrategyKind::Api);

    let err = engine
        .resolve_batch(&["octocat", "ghost"], &["github", "gitlab"], &options)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::StrategyUnavailable {
            strategy: StrategyKind::Api,
            ..
        }
    ));
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn configured_api_credential_gives_full_confidence() {
    let client = RoutedClient::new(|request: &ProbeRequest| {
        assert_eq!(request.url.host_str(), Some("api.github.com"));
        assert_eq!(request.headers["authorization"], "Bearer t0ken");
        (200, r#"{"login": "octocat", "followers": 42}"#.to_string())
    });
    let engine = ResolutionEngine::builder()
        .with_http_client(client.clone())
        .with_credential("github_token", "t0ken")
        .build()
        .unwrap();
    let options = ResolveOptions::new().with_strategy_override(StrategyKind::Api);

    let report = engine.resolve("octocat", &["github"], &options).await.unwrap();
    let github = report.result("github").unwrap();
    assert_eq!(github.status, AttemptStatus::Taken);
    assert!(github.confidence >= 0.99);
    assert_eq!(github.metadata.get("followers").map(String::as_str), Some("42"));
    assert_eq!(client.calls(), 1);
}
