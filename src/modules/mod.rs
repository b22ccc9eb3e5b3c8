//! Cross-cutting services module
//!
//! Identity, egress, pacing and observability services shared by every
//! strategy and by the engine.

pub mod circuit;
pub mod events;
pub mod metrics;
pub mod proxy;
pub mod rate_limit;
pub mod spoofing;
pub mod timing;
pub mod tls;

// Re-export commonly used types
pub use circuit::{CircuitBreaker, CircuitConfig};
pub use events::{
    AttemptFinishedEvent, AttemptStartedEvent, CircuitEvent, EngineEvent, EventDispatcher,
    EventHandler, LoggingHandler, MetricsHandler, ResolvedEvent, RetryEvent,
};
pub use metrics::{GlobalStats, MetricsCollector, MetricsSnapshot, PlatformStats, StrategyStats};
pub use proxy::{
    ProxyConfig, ProxyEndpoint, ProxyFeedback, ProxyHealthReport, ProxyLease, ProxyPool,
    RotationStrategy,
};
pub use rate_limit::RateLimiter;
pub use spoofing::{BrowserType, Fingerprint, FingerprintGenerator, FingerprintProvider};
pub use timing::{Backoff, JitterRange};
pub use tls::{BrowserProfile, TlsProfileCatalog};
