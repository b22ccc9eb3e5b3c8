//! Batch coordinator.
//!
//! Fans every (username, platform) pair of a call out through a bounded
//! `FuturesUnordered`. Once the call is cancelled no new pair is scheduled
//! and running pairs start no new attempt; attempts in flight get a grace
//! period to finish and are otherwise reported with what completed.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::config::ResolveOptions;
use crate::engine::{AttemptTrace, CallPlan, EngineResult, ResolutionEngine};
use crate::platforms::PlatformDescriptor;
use crate::report::{
    CheckReport, CheckReportBuilder, PlatformResult, ReportSummary, RiskAssessment, RiskLevel,
    duration_ms, recommendations,
};
use crate::username::Username;

/// Reports for every username of a batch call, in input order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub reports: Vec<CheckReport>,
    /// Aggregated over every result of the call.
    pub summary: ReportSummary,
    pub recommendations: Vec<String>,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    #[serde(rename = "elapsed_ms", serialize_with = "duration_ms")]
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn report(&self, username: &str) -> Option<&CheckReport> {
        let wanted = username.trim().trim_start_matches('@');
        self.reports
            .iter()
            .find(|report| report.username.eq_ignore_ascii_case(wanted))
    }

    pub fn result(&self, username: &str, platform: &str) -> Option<&PlatformResult> {
        self.report(username)?.result(platform)
    }

    pub fn results(&self) -> impl Iterator<Item = &PlatformResult> {
        self.reports.iter().flat_map(|report| report.results.iter())
    }

    pub fn is_complete(&self) -> bool {
        self.reports.iter().all(|report| report.complete)
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    username: usize,
    platform: usize,
}

/// Runs batch calls on behalf of a [`ResolutionEngine`].
#[derive(Clone)]
pub struct BatchCoordinator {
    engine: ResolutionEngine,
}

impl BatchCoordinator {
    pub fn new(engine: ResolutionEngine) -> Self {
        Self { engine }
    }

    pub async fn run<U: AsRef<str>, P: AsRef<str>>(
        &self,
        usernames: &[U],
        platforms: &[P],
        options: &ResolveOptions,
    ) -> EngineResult<BatchReport> {
        let call = self.engine.prepare(usernames, platforms, options)?;
        let plan = &call.plan;
        // A child token lets the deadline cancel this call without touching
        // the caller's token.
        let cancel = options
            .cancellation
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_default();
        let deadline = options.deadline.map(|after| {
            let token = cancel.clone();
            tokio::spawn(async move {
                sleep(after).await;
                log::info!("batch deadline of {:?} reached", after);
                token.cancel();
            })
        });
        let started_at = Utc::now();
        let started = Instant::now();

        let mut builders: Vec<CheckReportBuilder> = call
            .usernames
            .iter()
            .map(|username| {
                let analysis = username.leet_analysis();
                let risk = RiskAssessment::assess(
                    &analysis,
                    call.platforms.iter().map(|platform| platform.as_ref()),
                );
                if risk.level > RiskLevel::Low {
                    log::info!("@{}: {:?} risk (score {:.2})", username, risk.level, risk.score);
                }
                CheckReportBuilder::new(username.as_str(), call.platforms.len())
                    .started_at(started_at)
                    .assessed(analysis, risk)
            })
            .collect();
        let total = call.usernames.len() * call.platforms.len();
        log::info!(
            "resolving {} pair(s) with concurrency {}",
            total,
            plan.concurrency
        );

        let mut in_flight = FuturesUnordered::new();
        let mut scheduled = 0usize;
        'schedule: for (u, username) in call.usernames.iter().enumerate() {
            for (p, platform) in call.platforms.iter().enumerate() {
                if cancel.is_cancelled() {
                    break 'schedule;
                }
                let slot = Slot {
                    username: u,
                    platform: p,
                };
                in_flight.push(self.run_pair(slot, username, platform, plan, &cancel));
                scheduled += 1;

                while in_flight.len() >= plan.concurrency {
                    if let Some((slot, result)) = in_flight.next().await {
                        builders[slot.username].insert(slot.platform, result);
                    }
                }
            }
        }
        while let Some((slot, result)) = in_flight.next().await {
            builders[slot.username].insert(slot.platform, result);
        }

        if let Some(timer) = deadline {
            timer.abort();
        }
        let cancelled = cancel.is_cancelled();
        if cancelled {
            log::warn!(
                "batch cancelled: {} of {} pair(s) never started",
                total - scheduled,
                total
            );
        }

        let elapsed = started.elapsed();
        let open_circuits = self.engine.open_circuits();
        let reports: Vec<CheckReport> = builders
            .into_iter()
            .map(|builder| builder.build(elapsed, &open_circuits))
            .collect();
        let all_results = reports.iter().flat_map(|report| report.results.iter());
        let summary = ReportSummary::from_results(all_results.clone());
        let mut recommendations = recommendations(&summary, all_results, &open_circuits);
        if let Some(riskiest) = reports
            .iter()
            .map(|report| &report.risk)
            .filter(|risk| risk.level > RiskLevel::Low)
            .max_by_key(|risk| risk.level)
        {
            recommendations.extend(riskiest.precautions.iter().cloned());
        }

        Ok(BatchReport {
            reports,
            summary,
            recommendations,
            cancelled,
            started_at,
            elapsed,
        })
    }

    async fn run_pair(
        &self,
        slot: Slot,
        username: &Username,
        platform: &PlatformDescriptor,
        plan: &CallPlan,
        cancel: &CancellationToken,
    ) -> (Slot, PlatformResult) {
        let trace = AttemptTrace::default();
        let started = Instant::now();
        let work = self.engine.resolve_pair(username, platform, plan, &trace, cancel);
        tokio::pin!(work);

        let result = tokio::select! {
            biased;
            result = &mut work => result,
            _ = cancel.cancelled() => match timeout(plan.grace_period, &mut work).await {
                Ok(result) => result,
                Err(_) => self.engine.abandon(username, platform, plan, &trace, started.elapsed()),
            },
        };
        (slot, result)
    }
}
