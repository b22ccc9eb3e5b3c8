//! # handlescan-rs
//!
//! Concurrent username availability resolution across many platforms.
//!
//! Each platform is probed through an ordered chain of strategies, from a
//! plain HTTP request up to a stealth browser session with CAPTCHA solving
//! or an authenticated API lookup. The first outcome that clears the
//! confidence threshold becomes the verdict; blocks and transient errors
//! escalate to the next strategy.
//!
//! ## Features
//!
//! - Declarative platform catalog with status, pattern, selector and JSON rules
//! - Five probe strategies with per-platform confidence ceilings
//! - Per-attempt browser fingerprints and proxy rotation with health cool-down
//! - Per-platform rate limiting and circuit breaking
//! - Batch fan-out with a concurrency budget and graceful cancellation
//!
//! ## Example
//!
//! ```no_run
//! use handlescan_rs::{ResolutionEngine, ResolveOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = ResolutionEngine::new()?;
//!     let report = engine
//!         .resolve("octocat", &["github", "reddit"], &ResolveOptions::new())
//!         .await?;
//!     for result in &report.results {
//!         println!("{}: {} ({:.2})", result.platform, result.status, result.confidence);
//!     }
//!     Ok(())
//! }
//! ```

mod batch;
mod engine;

pub mod config;
pub mod detection;
pub mod external_deps;
pub mod modules;
pub mod platforms;
pub mod report;
pub mod strategies;
pub mod transport;
pub mod username;

pub use crate::batch::{BatchCoordinator, BatchReport};

pub use crate::engine::{
    EngineBuilder,
    EngineError,
    EngineResult,
    ResolutionEngine,
    SystemStatus,
};

pub use crate::config::{
    ConfigError,
    EnginePolicy,
    ResolveOptions,
    load_policy,
};

pub use crate::detection::{BlockDetector, BlockKind, BlockSignal};

pub use crate::external_deps::browser::{
    ChallengeArtifact,
    PageRenderer,
    RenderError,
    RenderRequest,
    RenderedPage,
    StaticPageRenderer,
};

pub use crate::external_deps::captcha::{
    CaptchaConfig,
    CaptchaError,
    CaptchaResult,
    CaptchaSolution,
    CaptchaSolver,
    ChallengeImage,
    OcrCaptchaSolver,
};

pub use crate::modules::{
    Backoff,
    BrowserType,
    CircuitConfig,
    EngineEvent,
    EventHandler,
    Fingerprint,
    FingerprintGenerator,
    FingerprintProvider,
    MetricsSnapshot,
    ProxyConfig,
    ProxyHealthReport,
    RotationStrategy,
};

pub use crate::platforms::{
    ApiEndpoint,
    Category,
    Difficulty,
    ParseRule,
    PlatformDescriptor,
    PlatformRegistry,
    PlatformSpec,
    RegistryError,
};

pub use crate::report::{
    CheckReport, PlatformResult, ReportSummary, RiskAssessment, RiskFactor, RiskLevel,
};

pub use crate::strategies::{
    AttemptContext,
    AttemptDetail,
    AttemptOutcome,
    AttemptStatus,
    Credentials,
    Strategy,
    StrategyError,
    StrategyKind,
};

pub use crate::transport::{
    ProbeHttpClient,
    ProbeRequest,
    ProbeResponse,
    ReqwestProbeClient,
    TransportError,
};

pub use crate::username::{LeetAnalysis, Username, UsernameError, UsernamePolicy};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
