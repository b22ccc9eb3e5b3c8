//! Resolved verdicts and per-username reports.
//!
//! A [`PlatformResult`] is built exactly once per (username, platform) pair
//! from the attempts the engine made; a [`CheckReport`] collects the results
//! for one username in platform input order together with summary
//! statistics, a pre-check risk assessment and follow-up recommendations.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::platforms::{Category, PlatformDescriptor};
use crate::strategies::{AttemptDetail, AttemptOutcome, AttemptStatus, StrategyKind};
use crate::username::LeetAnalysis;

/// Detail message for usernames a platform cannot hold.
pub const USERNAME_REJECTED: &str = "username_rejected_by_platform";

pub(crate) fn duration_ms<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Final verdict for one platform.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformResult {
    pub platform: String,
    pub display_name: String,
    pub category: Category,
    pub status: AttemptStatus,
    /// Strategy whose outcome became the verdict.
    pub strategy: Option<StrategyKind>,
    pub confidence: f64,
    pub accepted: bool,
    /// No outcome met the acceptance threshold.
    pub low_confidence: bool,
    pub short_circuited: bool,
    pub needs_retry: bool,
    pub attempts: usize,
    #[serde(rename = "elapsed_ms", serialize_with = "duration_ms")]
    pub elapsed: Duration,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    pub detail: AttemptDetail,
    /// Every attempt in execution order, winner included.
    pub history: Vec<AttemptOutcome>,
}

impl PlatformResult {
    /// Picks the verdict from the attempt history: the first accepted
    /// outcome, otherwise the highest-confidence one (later wins ties).
    pub fn resolve(
        platform: &PlatformDescriptor,
        history: Vec<AttemptOutcome>,
        threshold: f64,
        elapsed: Duration,
    ) -> Self {
        let accepted = history.iter().position(|outcome| outcome.is_accepted(threshold));
        let winner = accepted.or_else(|| {
            history
                .iter()
                .enumerate()
                .fold(None::<(usize, f64)>, |best, (idx, outcome)| match best {
                    Some((_, confidence)) if outcome.confidence < confidence => best,
                    _ => Some((idx, outcome.confidence)),
                })
                .map(|(idx, _)| idx)
        });

        let Some(winner) = winner.map(|idx| history[idx].clone()) else {
            let mut result = Self::bare(platform, AttemptStatus::Error, elapsed);
            result.detail.message = Some("cancelled before any attempt finished".into());
            result.needs_retry = true;
            return result;
        };

        let is_accepted = accepted.is_some();
        let needs_retry =
            !is_accepted && !(winner.status == AttemptStatus::Error && !winner.retryable);
        Self {
            platform: platform.id.clone(),
            display_name: platform.display_name.clone(),
            category: platform.category,
            status: winner.status,
            strategy: Some(winner.strategy),
            confidence: winner.confidence,
            accepted: is_accepted,
            low_confidence: !is_accepted,
            short_circuited: false,
            needs_retry,
            attempts: history.len(),
            elapsed,
            metadata: winner.metadata,
            detail: winner.detail,
            history,
        }
    }

    /// Verdict for a platform skipped because its circuit is open.
    pub fn short_circuited(platform: &PlatformDescriptor, remaining: Duration) -> Self {
        let mut result = Self::bare(platform, AttemptStatus::Blocked, Duration::ZERO);
        result.short_circuited = true;
        result.needs_retry = true;
        result.detail.matched = Some("circuit_open".into());
        result.detail.message = Some(format!(
            "circuit open for another {}s",
            remaining.as_secs()
        ));
        result
    }

    /// Verdict for a username the platform cannot hold.
    pub fn rejected_by_platform(platform: &PlatformDescriptor, max_length: usize) -> Self {
        let mut result = Self::bare(platform, AttemptStatus::Error, Duration::ZERO);
        result.detail.matched = Some(USERNAME_REJECTED.into());
        result.detail.message = Some(format!("{USERNAME_REJECTED}: longer than {max_length}"));
        result
    }

    fn bare(platform: &PlatformDescriptor, status: AttemptStatus, elapsed: Duration) -> Self {
        Self {
            platform: platform.id.clone(),
            display_name: platform.display_name.clone(),
            category: platform.category,
            status,
            strategy: None,
            confidence: 0.0,
            accepted: false,
            low_confidence: true,
            short_circuited: false,
            needs_retry: false,
            attempts: 0,
            elapsed,
            metadata: BTreeMap::new(),
            detail: AttemptDetail::default(),
            history: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportSummary {
    pub total: usize,
    pub available: usize,
    pub taken: usize,
    pub ambiguous: usize,
    pub blocked: usize,
    pub errors: usize,
    pub low_confidence: usize,
    /// Share of platforms that produced a definitive verdict.
    pub success_rate: f64,
    /// Share of platforms where the username is available.
    pub availability_rate: f64,
    pub average_confidence: f64,
    pub max_confidence: f64,
    pub min_confidence: f64,
}

impl ReportSummary {
    pub fn from_results<'a, I>(results: I) -> Self
    where
        I: IntoIterator<Item = &'a PlatformResult>,
    {
        let mut summary = Self::default();
        let mut confidence_sum = 0.0;
        let mut min_confidence = f64::MAX;
        for result in results {
            summary.total += 1;
            match result.status {
                AttemptStatus::Available => summary.available += 1,
                AttemptStatus::Taken => summary.taken += 1,
                AttemptStatus::Ambiguous => summary.ambiguous += 1,
                AttemptStatus::Blocked => summary.blocked += 1,
                AttemptStatus::Error => summary.errors += 1,
            }
            if result.low_confidence {
                summary.low_confidence += 1;
            }
            confidence_sum += result.confidence;
            summary.max_confidence = summary.max_confidence.max(result.confidence);
            min_confidence = min_confidence.min(result.confidence);
        }

        if summary.total > 0 {
            let total = summary.total as f64;
            summary.success_rate = (summary.available + summary.taken) as f64 / total;
            summary.availability_rate = summary.available as f64 / total;
            summary.average_confidence = confidence_sum / total;
            summary.min_confidence = min_confidence;
        }
        summary
    }
}

/// Follow-up advice derived from a set of results.
pub fn recommendations<'a, I>(summary: &ReportSummary, results: I, open_circuits: &[String]) -> Vec<String>
where
    I: IntoIterator<Item = &'a PlatformResult>,
{
    let mut advice = Vec::new();
    if summary.total == 0 {
        return advice;
    }
    if summary.success_rate < 0.5 {
        advice.push("Low success rate: add proxies or increase the delay between requests".into());
        if summary.blocked > 0 {
            advice.push("Enable browser strategies for platforms that block plain HTTP probes".into());
        }
    }
    if summary.average_confidence < 0.7 {
        advice.push("Average confidence is low: verify the results manually".into());
    }

    let mut retry: Vec<&str> = Vec::new();
    for result in results {
        if result.needs_retry && !retry.contains(&result.platform.as_str()) {
            retry.push(&result.platform);
        }
    }
    for platform in retry {
        advice.push(format!("Retry {platform}"));
    }

    if !open_circuits.is_empty() {
        advice.push(format!(
            "Circuit open for {}: wait for the cool-down before retrying",
            open_circuits.join(", ")
        ));
    }
    advice
}

/// Leet confidence above which the username itself adds risk.
const LEET_RISK_CONFIDENCE: f64 = 0.5;
/// Calls covering more platforms than this add volume risk.
const HIGH_VOLUME_PLATFORMS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskFactor {
    pub name: &'static str,
    pub weight: f64,
}

/// How likely a call is to run into blocking, judged before any request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub score: f64,
    pub factors: Vec<RiskFactor>,
    pub precautions: Vec<String>,
}

impl RiskAssessment {
    pub fn assess<'a, I>(analysis: &LeetAnalysis, platforms: I) -> Self
    where
        I: IntoIterator<Item = &'a PlatformDescriptor>,
    {
        let mut total = 0;
        let mut difficult = 0;
        for platform in platforms {
            total += 1;
            if platform.difficulty.is_high() {
                difficult += 1;
            }
        }

        let mut factors = Vec::new();
        if analysis.confidence > LEET_RISK_CONFIDENCE {
            factors.push(RiskFactor {
                name: "leet_username",
                weight: 0.3,
            });
        }
        if difficult > 0 {
            factors.push(RiskFactor {
                name: "difficult_platforms",
                weight: 0.4 * difficult as f64,
            });
        }
        if total > HIGH_VOLUME_PLATFORMS {
            factors.push(RiskFactor {
                name: "high_volume",
                weight: 0.2,
            });
        }

        let score: f64 = factors.iter().map(|factor| factor.weight).sum();
        let level = if score > 0.7 {
            RiskLevel::High
        } else if score > 0.3 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };
        Self {
            level,
            score,
            factors,
            precautions: precautions(level),
        }
    }
}

fn precautions(level: RiskLevel) -> Vec<String> {
    let lines: &[&str] = match level {
        RiskLevel::High => &[
            "Use residential proxies",
            "Run every check through the stealth browser",
            "Increase the delay between requests",
            "Keep batches small",
        ],
        RiskLevel::Medium => &[
            "Rotate proxies between platforms",
            "Use moderate delays between requests",
            "Enable stealth headers",
        ],
        RiskLevel::Low => &["Standard settings are sufficient"],
    };
    lines.iter().map(|line| line.to_string()).collect()
}

/// Advice from the pre-check analysis; low risk adds nothing.
pub fn assessment_advice(username: &str, analysis: &LeetAnalysis, risk: &RiskAssessment) -> Vec<String> {
    let mut advice = Vec::new();
    if analysis.is_leet && analysis.normalized != username {
        advice.push(format!(
            "Leet spelling detected: also check {}",
            analysis.normalized
        ));
    }
    if analysis.is_leet && analysis.confidence > LEET_RISK_CONFIDENCE && !analysis.variants.is_empty() {
        let shown: Vec<&str> = analysis.variants.iter().take(3).map(String::as_str).collect();
        advice.push(format!("Consider checking leet variants: {}", shown.join(", ")));
    }
    if risk.level > RiskLevel::Low {
        advice.extend(risk.precautions.iter().cloned());
    }
    advice
}

/// All results for one username.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub username: String,
    pub results: Vec<PlatformResult>,
    pub summary: ReportSummary,
    pub recommendations: Vec<String>,
    pub analysis: LeetAnalysis,
    pub risk: RiskAssessment,
    /// Every requested platform has a result.
    pub complete: bool,
    pub started_at: DateTime<Utc>,
    #[serde(rename = "elapsed_ms", serialize_with = "duration_ms")]
    pub elapsed: Duration,
}

impl CheckReport {
    pub fn result(&self, platform: &str) -> Option<&PlatformResult> {
        self.results.iter().find(|result| result.platform == platform)
    }
}

/// Collects results as they complete and restores input order on build.
#[derive(Debug)]
pub struct CheckReportBuilder {
    username: String,
    started_at: DateTime<Utc>,
    slots: Vec<Option<PlatformResult>>,
    analysis: LeetAnalysis,
    risk: RiskAssessment,
}

impl CheckReportBuilder {
    pub fn new(username: impl Into<String>, platforms: usize) -> Self {
        Self {
            username: username.into(),
            started_at: Utc::now(),
            slots: vec![None; platforms],
            analysis: LeetAnalysis::default(),
            risk: RiskAssessment::default(),
        }
    }

    pub fn assessed(mut self, analysis: LeetAnalysis, risk: RiskAssessment) -> Self {
        self.analysis = analysis;
        self.risk = risk;
        self
    }

    pub fn started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    /// Stores the result for the platform at `index`; a second insert for
    /// the same slot is ignored.
    pub fn insert(&mut self, index: usize, result: PlatformResult) {
        if let Some(slot) = self.slots.get_mut(index)
            && slot.is_none()
        {
            *slot = Some(result);
        }
    }

    pub fn build(self, elapsed: Duration, open_circuits: &[String]) -> CheckReport {
        let complete = self.slots.iter().all(Option::is_some);
        let results: Vec<PlatformResult> = self.slots.into_iter().flatten().collect();
        let summary = ReportSummary::from_results(&results);
        let mut recommendations = recommendations(&summary, &results, open_circuits);
        recommendations.extend(assessment_advice(&self.username, &self.analysis, &self.risk));
        CheckReport {
            username: self.username,
            results,
            summary,
            recommendations,
            analysis: self.analysis,
            risk: self.risk,
            complete,
            started_at: self.started_at,
            elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::{Difficulty, ParseRule, PlatformSpec};
    use crate::username::{Username, UsernamePolicy};

    fn platform() -> PlatformDescriptor {
        PlatformSpec::new(
            "example",
            "https://example.com/{username}",
            vec![StrategyKind::HttpBasic, StrategyKind::BrowserStealth],
            ParseRule::status_code(),
        )
        .try_into()
        .unwrap()
    }

    fn outcome(kind: StrategyKind, status: AttemptStatus, confidence: f64) -> AttemptOutcome {
        AttemptOutcome::new(kind, status, confidence)
    }

    #[test]
    fn first_accepted_outcome_wins() {
        let history = vec![
            outcome(StrategyKind::HttpBasic, AttemptStatus::Blocked, 0.0),
            outcome(StrategyKind::BrowserStealth, AttemptStatus::Available, 0.9),
        ];
        let result = PlatformResult::resolve(&platform(), history, 0.8, Duration::from_secs(1));
        assert_eq!(result.strategy, Some(StrategyKind::BrowserStealth));
        assert_eq!(result.status, AttemptStatus::Available);
        assert!(result.accepted && !result.low_confidence && !result.needs_retry);
        assert_eq!(result.attempts, 2);
    }

    #[test]
    fn exhausted_chain_reports_best_outcome_as_low_confidence() {
        let history = vec![
            outcome(StrategyKind::HttpBasic, AttemptStatus::Taken, 0.7),
            outcome(StrategyKind::BrowserStealth, AttemptStatus::Blocked, 0.0),
        ];
        let result = PlatformResult::resolve(&platform(), history, 0.8, Duration::ZERO);
        assert_eq!(result.status, AttemptStatus::Taken);
        assert_eq!(result.strategy, Some(StrategyKind::HttpBasic));
        assert!(result.low_confidence && result.needs_retry);
    }

    #[test]
    fn ties_go_to_the_last_strategy() {
        let history = vec![
            outcome(StrategyKind::HttpBasic, AttemptStatus::Blocked, 0.0),
            outcome(StrategyKind::BrowserStealth, AttemptStatus::Error, 0.0),
        ];
        let result = PlatformResult::resolve(&platform(), history, 0.8, Duration::ZERO);
        assert_eq!(result.strategy, Some(StrategyKind::BrowserStealth));
    }

    #[test]
    fn summary_and_recommendations() {
        let platform = platform();
        let mut builder = CheckReportBuilder::new("ghost", 3);
        builder.insert(
            2,
            PlatformResult::resolve(
                &platform,
                vec![outcome(StrategyKind::HttpBasic, AttemptStatus::Available, 0.9)],
                0.8,
                Duration::ZERO,
            ),
        );
        builder.insert(0, PlatformResult::short_circuited(&platform, Duration::from_secs(30)));
        let report = builder.build(Duration::from_secs(2), &["example".to_string()]);

        assert!(!report.complete);
        assert_eq!(report.results.len(), 2);
        assert!(report.results[0].short_circuited);
        assert_eq!(report.summary.available, 1);
        assert_eq!(report.summary.availability_rate, 0.5);
        assert!(report.recommendations.iter().any(|line| line == "Retry example"));
        assert!(report.recommendations.iter().any(|line| line.starts_with("Circuit open")));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["elapsed_ms"], 2000);
        assert_eq!(json["results"][1]["status"], "available");
    }

    #[test]
    fn rejected_username_needs_no_retry() {
        let result = PlatformResult::rejected_by_platform(&platform(), 15);
        assert_eq!(result.status, AttemptStatus::Error);
        assert_eq!(result.detail.matched.as_deref(), Some(USERNAME_REJECTED));
        assert!(!result.needs_retry);
    }

    fn rated(id: &str, difficulty: Difficulty) -> PlatformDescriptor {
        PlatformSpec::new(
            id,
            format!("https://{id}.test/{{username}}"),
            vec![StrategyKind::HttpBasic],
            ParseRule::status_code(),
        )
        .with_difficulty(difficulty)
        .try_into()
        .unwrap()
    }

    fn analysis(raw: &str) -> LeetAnalysis {
        Username::parse(raw, &UsernamePolicy::default())
            .unwrap()
            .leet_analysis()
    }

    #[test]
    fn easy_platforms_and_plain_names_are_low_risk() {
        let plain = analysis("ghost");
        let platforms = [rated("a", Difficulty::Easy), rated("b", Difficulty::Medium)];
        let risk = RiskAssessment::assess(&plain, &platforms);
        assert_eq!(risk.level, RiskLevel::Low);
        assert!(risk.factors.is_empty());
        assert!(assessment_advice("ghost", &plain, &risk).is_empty());
    }

    #[test]
    fn difficult_platforms_raise_risk_and_add_precautions() {
        let plain = analysis("ghost");
        let risk = RiskAssessment::assess(&plain, &[rated("a", Difficulty::Hard)]);
        assert_eq!(risk.level, RiskLevel::Medium);
        let advice = assessment_advice("ghost", &plain, &risk);
        assert!(advice.iter().any(|line| line == "Rotate proxies between platforms"));

        let leet = analysis("xx_l33t_h4x0r_xx");
        let platforms = [rated("a", Difficulty::Hard), rated("b", Difficulty::Extreme)];
        let risk = RiskAssessment::assess(&leet, &platforms);
        assert_eq!(risk.level, RiskLevel::High);
        let names: Vec<&str> = risk.factors.iter().map(|factor| factor.name).collect();
        assert_eq!(names, ["leet_username", "difficult_platforms"]);

        let advice = assessment_advice("xx_l33t_h4x0r_xx", &leet, &risk);
        assert_eq!(advice[0], "Leet spelling detected: also check xx_leet_haxor_xx");
        assert!(advice[1].starts_with("Consider checking leet variants: "));
        assert!(advice.iter().any(|line| line == "Use residential proxies"));
    }

    #[test]
    fn many_platforms_add_volume_risk() {
        let plain = analysis("ghost");
        let platforms: Vec<PlatformDescriptor> = (0..11)
            .map(|idx| rated(&format!("p{idx}"), Difficulty::Easy))
            .collect();
        let risk = RiskAssessment::assess(&plain, &platforms);
        assert_eq!(risk.factors.len(), 1);
        assert_eq!(risk.factors[0].name, "high_volume");
        assert_eq!(risk.level, RiskLevel::Low);
    }
}
