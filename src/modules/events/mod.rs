//! Event system for the resolution engine.
//!
//! Provides hooks for metrics, logging, and custom reactions around attempt
//! activity.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use super::metrics::MetricsCollector;
use crate::strategies::{AttemptStatus, StrategyKind};

#[derive(Debug, Clone)]
pub struct AttemptStartedEvent {
    pub platform: String,
    pub username: String,
    pub strategy: StrategyKind,
    pub attempt: u32,
    pub proxy: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AttemptFinishedEvent {
    pub platform: String,
    pub username: String,
    pub strategy: StrategyKind,
    pub status: AttemptStatus,
    pub confidence: f64,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RetryEvent {
    pub platform: String,
    pub strategy: StrategyKind,
    pub attempt: u32,
    pub reason: String,
    pub scheduled_after: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CircuitEvent {
    pub platform: String,
    pub cooldown: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ResolvedEvent {
    pub platform: String,
    pub username: String,
    pub status: AttemptStatus,
    pub strategy: Option<StrategyKind>,
    pub confidence: f64,
    pub accepted: bool,
    pub short_circuited: bool,
    pub elapsed: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum EngineEvent {
    AttemptStarted(AttemptStartedEvent),
    AttemptFinished(AttemptFinishedEvent),
    Retry(RetryEvent),
    CircuitOpened(CircuitEvent),
    ShortCircuited(CircuitEvent),
    Resolved(ResolvedEvent),
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &EngineEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: EngineEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &EngineEvent) {
        match event {
            EngineEvent::AttemptStarted(started) => {
                log::debug!(
                    "-> {} @{} via {} (attempt {})",
                    started.platform,
                    started.username,
                    started.strategy,
                    started.attempt
                );
            }
            EngineEvent::AttemptFinished(finished) => {
                log::debug!(
                    "<- {} @{} via {} -> {} {:.2} ({:.2}s)",
                    finished.platform,
                    finished.username,
                    finished.strategy,
                    finished.status,
                    finished.confidence,
                    finished.latency.as_secs_f64()
                );
            }
            EngineEvent::Retry(retry) => {
                log::info!(
                    "retry {} via {} attempt {} after {:.2}s: {}",
                    retry.platform,
                    retry.strategy,
                    retry.attempt,
                    retry.scheduled_after.as_secs_f64(),
                    retry.reason
                );
            }
            EngineEvent::CircuitOpened(circuit) => {
                log::warn!(
                    "circuit opened for {} ({:.0}s)",
                    circuit.platform,
                    circuit.cooldown.as_secs_f64()
                );
            }
            EngineEvent::ShortCircuited(circuit) => {
                log::info!(
                    "skipping {}: circuit open for another {:.0}s",
                    circuit.platform,
                    circuit.cooldown.as_secs_f64()
                );
            }
            EngineEvent::Resolved(resolved) => {
                log::info!(
                    "{} @{} => {} ({:.2}, accepted={})",
                    resolved.platform,
                    resolved.username,
                    resolved.status,
                    resolved.confidence,
                    resolved.accepted
                );
            }
        }
    }
}

/// Metrics handler that feeds the metrics collector.
#[derive(Clone, Debug)]
pub struct MetricsHandler {
    metrics: MetricsCollector,
}

impl MetricsHandler {
    pub fn new(metrics: MetricsCollector) -> Self {
        Self { metrics }
    }
}

impl EventHandler for MetricsHandler {
    fn handle(&self, event: &EngineEvent) {
        match event {
            EngineEvent::AttemptFinished(finished) => {
                self.metrics.record_attempt(
                    &finished.platform,
                    finished.strategy,
                    finished.status,
                    finished.latency,
                );
            }
            EngineEvent::Resolved(resolved) => {
                let accepted_by = resolved.strategy.filter(|_| resolved.accepted);
                self.metrics
                    .record_resolution(accepted_by, resolved.short_circuited);
            }
            _ => {}
        }
    }
}
