use std::sync::Arc;

use async_trait::async_trait;
use http::HeaderValue;
use http::header::USER_AGENT;

use super::{ChallengeArtifact, PageRenderer, RenderError, RenderRequest, RenderedPage};
use crate::detection::{BlockDetector, BlockKind};
use crate::transport::{ProbeHttpClient, ProbeRequest, TransportError};

/// Renderer that fetches server-side markup without executing scripts.
pub struct StaticPageRenderer {
    client: Arc<dyn ProbeHttpClient>,
}

impl StaticPageRenderer {
    pub fn new(client: Arc<dyn ProbeHttpClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageRenderer for StaticPageRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<RenderedPage, RenderError> {
        let mut headers = request.headers.clone();
        if !headers.contains_key(USER_AGENT)
            && let Ok(value) = HeaderValue::from_str(&request.user_agent)
        {
            headers.insert(USER_AGENT, value);
        }

        let probe = ProbeRequest::get(request.url.clone(), request.timeout)
            .with_headers(headers)
            .with_proxy(request.proxy.clone());
        let response = self.client.fetch(probe).await.map_err(|err| match err {
            TransportError::Timeout(after) => RenderError::Timeout(after),
            other => RenderError::Navigation(other.to_string()),
        })?;

        let html = response.text().into_owned();
        // Without a script engine, CAPTCHA widgets can only be reported.
        let challenge = BlockDetector::detect(response.status, &html, &[])
            .filter(|signal| signal.kind == BlockKind::Captcha)
            .map(|signal| ChallengeArtifact::Interactive {
                provider: signal.signature,
            });

        Ok(RenderedPage {
            url: response.url,
            status: response.status,
            html,
            challenge,
        })
    }

    async fn submit_challenge(
        &self,
        _page: &RenderedPage,
        _answer: &str,
    ) -> Result<RenderedPage, RenderError> {
        Err(RenderError::Unavailable(
            "static renderer cannot interact with pages".into(),
        ))
    }
}
