use std::sync::Arc;

use async_trait::async_trait;

use super::{
    AttemptContext, AttemptOutcome, AttemptStatus, Strategy, StrategyError, StrategyKind,
    clamp_confidence, judge_page, render_request,
};
use crate::external_deps::browser::{ChallengeArtifact, PageRenderer, RenderedPage};
use crate::external_deps::captcha::{CaptchaError, CaptchaSolver};
use crate::platforms::{PageInput, PlatformDescriptor};
use crate::username::Username;

/// Rendering with anti-automation countermeasures. Text CAPTCHAs are
/// answered through the solver, re-normalizing harder on every rejected
/// submission.
pub struct BrowserStealthStrategy {
    renderer: Arc<dyn PageRenderer>,
    solver: Option<Arc<dyn CaptchaSolver>>,
}

impl BrowserStealthStrategy {
    pub fn new(renderer: Arc<dyn PageRenderer>) -> Self {
        Self {
            renderer,
            solver: None,
        }
    }

    pub fn with_solver(mut self, solver: Arc<dyn CaptchaSolver>) -> Self {
        self.solver = Some(solver);
        self
    }
}

/// Tracks solver activity across passes for one page.
#[derive(Debug, Default)]
struct SolveState {
    passes: u32,
    confidence: Option<f64>,
}

impl SolveState {
    fn stamp(&self, mut outcome: AttemptOutcome) -> AttemptOutcome {
        if self.passes > 0 {
            outcome.detail.captcha_passes = Some(self.passes);
            outcome.detail.captcha_confidence = self.confidence;
        }
        outcome
    }
}

#[async_trait]
impl Strategy for BrowserStealthStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::BrowserStealth
    }

    async fn attempt(
        &self,
        username: &Username,
        platform: &PlatformDescriptor,
        ctx: &AttemptContext<'_>,
    ) -> Result<AttemptOutcome, StrategyError> {
        let kind = self.kind();
        let url = platform
            .probe_url(username)
            .map_err(|source| StrategyError::InvalidUrl {
                platform: platform.id.clone(),
                source,
            })?;

        let mut page = match self.renderer.render(&render_request(url, ctx, true)).await {
            Ok(page) => page,
            Err(err) => return Ok(AttemptOutcome::error(kind, err.to_string(), err.is_retryable())),
        };

        let mut state = SolveState::default();
        while let Some(challenge) = page.challenge.clone() {
            let image = match challenge {
                ChallengeArtifact::Interactive { provider } => {
                    return Ok(state.stamp(blocked(&page, format!("interactive challenge ({provider})"))));
                }
                ChallengeArtifact::Image(image) => image,
            };
            if !ctx.captcha_enabled {
                return Ok(blocked(&page, "captcha solving disabled"));
            }
            let Some(solver) = self.solver.as_ref() else {
                return Ok(blocked(&page, "no captcha solver configured"));
            };
            if state.passes >= ctx.captcha_attempts {
                log::info!(
                    "{}: captcha still present after {} passes",
                    platform.id,
                    state.passes
                );
                return Ok(state.stamp(blocked(
                    &page,
                    format!("captcha unsolved after {} passes", state.passes),
                )));
            }

            let pass = state.passes;
            state.passes += 1;
            let solution = match solver.solve(&image, pass).await {
                Ok(solution) => solution,
                // An unreadable image still counts as a pass.
                Err(CaptchaError::Recognition(reason)) => {
                    log::debug!("{}: {} pass {pass} unreadable: {reason}", platform.id, solver.name());
                    continue;
                }
                Err(err) => {
                    return Ok(state.stamp(AttemptOutcome::error(
                        kind,
                        format!("captcha solver {} failed: {err}", solver.name()),
                        false,
                    )));
                }
            };
            state.confidence = Some(solution.confidence);

            page = match self.renderer.submit_challenge(&page, &solution.text).await {
                Ok(next) => next,
                Err(err) => {
                    return Ok(state.stamp(AttemptOutcome::error(
                        kind,
                        err.to_string(),
                        err.is_retryable(),
                    )));
                }
            };
        }

        let mut outcome = judge_page(
            kind,
            platform,
            username,
            PageInput {
                status: page.status,
                body: &page.html,
                final_url: Some(page.url.as_str()),
            },
        );
        // The page decides the verdict; solver doubt only shades confidence.
        if let Some(solver_confidence) = state.confidence
            && outcome.status != AttemptStatus::Blocked
        {
            outcome.confidence =
                clamp_confidence(outcome.confidence * (0.8 + 0.2 * solver_confidence));
        }
        Ok(state.stamp(outcome))
    }
}

fn blocked(page: &RenderedPage, reason: impl Into<String>) -> AttemptOutcome {
    AttemptOutcome::blocked(StrategyKind::BrowserStealth, reason)
        .with_http_status(page.status)
        .with_matched("captcha")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external_deps::captcha::{CaptchaResult, CaptchaSolution, ChallengeImage};
    use crate::strategies::test_support::*;
    use std::sync::Mutex;

    struct FixedSolver {
        confidence: f64,
        passes: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl CaptchaSolver for FixedSolver {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn solve(&self, _image: &ChallengeImage, pass: u32) -> CaptchaResult {
            self.passes.lock().unwrap().push(pass);
            Ok(CaptchaSolution::new(format!("answer{pass}"), self.confidence))
        }
    }

    fn solver(confidence: f64) -> Arc<FixedSolver> {
        Arc::new(FixedSolver {
            confidence,
            passes: Mutex::new(Vec::new()),
        })
    }

    fn captcha_page() -> RenderedPage {
        let mut challenged = page(200, "<form>type the characters</form>");
        challenged.challenge = Some(ChallengeArtifact::Image(
            ChallengeImage::new(2, 2, vec![0, 255, 255, 0]).unwrap(),
        ));
        challenged
    }

    #[tokio::test]
    async fn solves_captcha_then_reads_page() {
        let renderer = Arc::new(ScriptedRenderer::new(
            [Ok(captcha_page())],
            [Ok(captcha_page()), Ok(page(404, "gone"))],
        ));
        let solver = solver(0.5);
        let strategy = BrowserStealthStrategy::new(renderer.clone()).with_solver(solver.clone());
        let platform = status_platform(vec![StrategyKind::BrowserStealth]);
        let fp = fingerprint();

        let outcome = strategy
            .attempt(&username("ghost"), &platform, &context(&fp))
            .await
            .unwrap();
        assert_eq!(outcome.status, AttemptStatus::Available);
        // 0.97 ceiling shaded by the solver's 0.5.
        assert!((outcome.confidence - 0.97 * 0.9).abs() < 1e-9);
        assert_eq!(outcome.detail.captcha_passes, Some(2));
        assert_eq!(*solver.passes.lock().unwrap(), vec![0, 1]);
        assert_eq!(*renderer.answers.lock().unwrap(), vec!["answer0", "answer1"]);
        assert_eq!(*renderer.stealth_flags.lock().unwrap(), vec![true]);
    }

    #[tokio::test]
    async fn gives_up_after_bounded_passes() {
        let renderer = Arc::new(ScriptedRenderer::new(
            [Ok(captcha_page())],
            [Ok(captcha_page()), Ok(captcha_page()), Ok(captcha_page())],
        ));
        let solver = solver(0.9);
        let strategy = BrowserStealthStrategy::new(renderer).with_solver(solver.clone());
        let platform = status_platform(vec![StrategyKind::BrowserStealth]);
        let fp = fingerprint();

        let outcome = strategy
            .attempt(&username("ghost"), &platform, &context(&fp))
            .await
            .unwrap();
        assert_eq!(outcome.status, AttemptStatus::Blocked);
        assert_eq!(outcome.detail.captcha_passes, Some(3));
        assert_eq!(solver.passes.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn disabled_captcha_reports_blocked() {
        let renderer = Arc::new(ScriptedRenderer::new([Ok(captcha_page())], []));
        let solver = solver(0.9);
        let strategy = BrowserStealthStrategy::new(renderer).with_solver(solver.clone());
        let platform = status_platform(vec![StrategyKind::BrowserStealth]);
        let fp = fingerprint();
        let mut ctx = context(&fp);
        ctx.captcha_enabled = false;

        let outcome = strategy
            .attempt(&username("ghost"), &platform, &ctx)
            .await
            .unwrap();
        assert_eq!(outcome.status, AttemptStatus::Blocked);
        assert!(solver.passes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn clean_page_keeps_page_confidence() {
        let renderer = Arc::new(ScriptedRenderer::new([Ok(page(200, "<h1>ghost</h1>"))], []));
        let strategy = BrowserStealthStrategy::new(renderer);
        let platform = status_platform(vec![StrategyKind::BrowserStealth]);
        let fp = fingerprint();

        let outcome = strategy
            .attempt(&username("ghost"), &platform, &context(&fp))
            .await
            .unwrap();
        assert_eq!(outcome.status, AttemptStatus::Taken);
        assert_eq!(outcome.confidence, 0.97);
        assert_eq!(outcome.detail.captcha_passes, None);
    }
}
