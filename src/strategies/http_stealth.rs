use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::http_basic::probe_page;
use super::{AttemptContext, AttemptOutcome, Strategy, StrategyError, StrategyKind};
use crate::modules::timing::JitterRange;
use crate::platforms::PlatformDescriptor;
use crate::transport::{ProbeHttpClient, ProbeRequest};
use crate::username::Username;

/// HTTP probe wearing the full fingerprint, preceded by a randomized pause.
pub struct HttpStealthStrategy {
    client: Arc<dyn ProbeHttpClient>,
    jitter: JitterRange,
}

impl HttpStealthStrategy {
    pub fn new(client: Arc<dyn ProbeHttpClient>) -> Self {
        Self {
            client,
            jitter: JitterRange::new(Duration::from_millis(250), Duration::from_millis(1_200)),
        }
    }

    pub fn with_jitter(mut self, jitter: JitterRange) -> Self {
        self.jitter = jitter;
        self
    }
}

#[async_trait]
impl Strategy for HttpStealthStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::HttpStealth
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

        // Never let the pause eat more than half of the attempt budget.
        let pause = self.jitter.sample().min(ctx.remaining() / 2);
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }

        let request = ProbeRequest::get(url, ctx.remaining())
            .with_headers(ctx.fingerprint.headers.clone())
            .with_proxy(ctx.proxy_address());
        Ok(probe_page(self.client.as_ref(), self.kind(), platform, username, request).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::AttemptStatus;
    use crate::strategies::test_support::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn sends_full_fingerprint_after_jitter() {
        let client = Arc::new(ScriptedClient::new([Ok(response(200, "<h1>octocat</h1>"))]));
        let strategy = HttpStealthStrategy::new(client.clone()).with_jitter(JitterRange::new(
            Duration::from_millis(300),
            Duration::from_millis(300),
        ));
        let platform = status_platform(vec![StrategyKind::HttpStealth]);
        let fp = fingerprint();

        let started = Instant::now();
        let outcome = strategy
            .attempt(&username("octocat"), &platform, &context(&fp))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(outcome.status, AttemptStatus::Taken);
        assert_eq!(outcome.confidence, 0.8);

        let requests = client.requests.lock().unwrap();
        assert_eq!(requests[0].headers, fp.headers);
    }
}
