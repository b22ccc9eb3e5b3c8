use std::sync::Arc;

use async_trait::async_trait;

use super::{AttemptContext, AttemptOutcome, Strategy, StrategyError, StrategyKind, judge_page};
use crate::platforms::{PageInput, PlatformDescriptor};
use crate::transport::{ProbeHttpClient, ProbeRequest};
use crate::username::Username;

/// One unauthenticated request carrying nothing but a user agent.
pub struct HttpBasicStrategy {
    client: Arc<dyn ProbeHttpClient>,
}

impl HttpBasicStrategy {
    pub fn new(client: Arc<dyn ProbeHttpClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Strategy for HttpBasicStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::HttpBasic
    }

    async fn attempt(
        &self,
        username: &Username,
        platform: &PlatformDescriptor,
        ctx: &AttemptContext<'_>,
    ) -> Result<AttemptOutcome, StrategyError> {
        let url = platform
            .probe_url(username)
            .map_err(|source| StrategyError::InvalidUrl {
                platform: platform.id.clone(),
                source,
            })?;
        let request = ProbeRequest::get(url, ctx.remaining())
            .with_headers(ctx.fingerprint.minimal_headers())
            .with_proxy(ctx.proxy_address());
        Ok(probe_page(self.client.as_ref(), self.kind(), platform, username, request).await)
    }
}

/// Fetches a profile page and judges it. Transport failures become `Error`
/// outcomes, retryable when the failure was transient.
pub(crate) async fn probe_page(
    client: &dyn ProbeHttpClient,
    kind: StrategyKind,
    platform: &PlatformDescriptor,
    username: &Username,
    request: ProbeRequest,
) -> AttemptOutcome {
    let proxy = request.proxy.clone();
    let mut outcome = match client.fetch(request).await {
        Ok(response) => {
            let body = response.text();
            judge_page(
                kind,
                platform,
                username,
                PageInput {
                    status: response.status,
                    body: &body,
                    final_url: Some(response.url.as_str()),
                },
            )
        }
        Err(err) => {
            log::debug!("{} via {kind}: {err}", platform.id);
            AttemptOutcome::error(kind, err.to_string(), err.is_retryable())
        }
    };
    outcome.detail.proxy = proxy;
    outcome
}
