use std::sync::Arc;

use async_trait::async_trait;

use super::{
    AttemptContext, AttemptOutcome, Strategy, StrategyError, StrategyKind, judge_page,
    render_request,
};
use crate::external_deps::browser::PageRenderer;
use crate::platforms::{PageInput, PlatformDescriptor};
use crate::username::Username;

/// Renders the profile page in a plain browsing context and reads the DOM.
/// Challenges are reported, never answered.
pub struct BrowserLightStrategy {
    renderer: Arc<dyn PageRenderer>,
}

impl BrowserLightStrategy {
    pub fn new(renderer: Arc<dyn PageRenderer>) -> Self {
        Self { renderer }
    }
}

#[async_trait]
impl Strategy for BrowserLightStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::BrowserLight
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

        let page = match self.renderer.render(&render_request(url, ctx, false)).await {
            Ok(page) => page,
            Err(err) => return Ok(AttemptOutcome::error(kind, err.to_string(), err.is_retryable())),
        };

        if page.challenge.is_some() {
            return Ok(AttemptOutcome::blocked(kind, "challenge presented")
                .with_http_status(page.status)
                .with_matched("captcha"));
        }

        Ok(judge_page(
            kind,
            platform,
            username,
            PageInput {
                status: page.status,
                body: &page.html,
                final_url: Some(page.url.as_str()),
            },
        ))
    }
}
