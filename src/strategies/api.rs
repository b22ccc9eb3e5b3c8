use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use http::header::{ACCEPT, HeaderName, USER_AGENT};
use http::{HeaderMap, HeaderValue};

use super::{AttemptContext, AttemptOutcome, AttemptStatus, Strategy, StrategyError, StrategyKind};
use crate::platforms::{PageInput, PlatformDescriptor};
use crate::transport::{ProbeHttpClient, ProbeRequest};
use crate::username::Username;

/// Secrets keyed by the credential names platform descriptors refer to.
#[derive(Clone, Default)]
pub struct Credentials(HashMap<String, String>);

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, secret: impl Into<String>) {
        self.0.insert(key.into(), secret.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.0.keys().collect();
        keys.sort();
        f.debug_struct("Credentials").field("keys", &keys).finish()
    }
}

/// Authenticated first-party API lookup.
pub struct ApiStrategy {
    client: Arc<dyn ProbeHttpClient>,
    credentials: Credentials,
}

impl ApiStrategy {
    pub fn new(client: Arc<dyn ProbeHttpClient>, credentials: Credentials) -> Self {
        Self {
            client,
            credentials,
        }
    }

    fn auth_headers(
        &self,
        platform: &PlatformDescriptor,
        header: &str,
        scheme: &str,
        secret: &str,
        ctx: &AttemptContext<'_>,
    ) -> Result<HeaderMap, StrategyError> {
        let misconfigured = |reason: String| StrategyError::Misconfigured {
            platform: platform.id.clone(),
            reason,
        };
        let name = HeaderName::from_bytes(header.as_bytes())
            .map_err(|err| misconfigured(format!("auth header `{header}`: {err}")))?;
        let raw = if scheme.is_empty() {
            secret.to_string()
        } else {
            format!("{scheme} {secret}")
        };
        let mut value = HeaderValue::from_str(&raw)
            .map_err(|_| misconfigured("credential is not a valid header value".into()))?;
        value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(name, value);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Ok(agent) = HeaderValue::from_str(&ctx.fingerprint.user_agent) {
            headers.insert(USER_AGENT, agent);
        }
        Ok(headers)
    }
}

#[async_trait]
impl Strategy for ApiStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Api
    }

    async fn attempt(
        &self,
        username: &Username,
        platform: &PlatformDescriptor,
        ctx: &AttemptContext<'_>,
    ) -> Result<AttemptOutcome, StrategyError> {
        let kind = self.kind();
        let Some(endpoint) = platform.api.as_ref() else {
            return Ok(AttemptOutcome::error(kind, "no api endpoint configured", false));
        };
        let Some(secret) = self.credentials.get(&endpoint.credential) else {
            return Ok(AttemptOutcome::error(
                kind,
                format!("credential `{}` not configured", endpoint.credential),
                false,
            ));
        };

        let url = endpoint
            .url_for(username)
            .map_err(|source| StrategyError::InvalidUrl {
                platform: platform.id.clone(),
                source,
            })?;
        let headers = self.auth_headers(platform, &endpoint.header, &endpoint.scheme, secret, ctx)?;
        let request = ProbeRequest::get(url, ctx.remaining())
            .with_headers(headers)
            .with_proxy(ctx.proxy_address());

        let response = match self.client.fetch(request).await {
            Ok(response) => response,
            Err(err) => return Ok(AttemptOutcome::error(kind, err.to_string(), err.is_retryable())),
        };

        let status = response.status;
        let outcome = match status {
            401 | 403 => AttemptOutcome::error(kind, "api rejected credentials", false),
            429 => {
                let reason = match response.retry_after() {
                    Some(delay) => format!("api rate limited, retry after {}s", delay.as_secs()),
                    None => "api rate limited".to_string(),
                };
                AttemptOutcome::blocked(kind, reason).with_matched("rate_limit")
            }
            500.. => AttemptOutcome::error(kind, format!("api server error {status}"), true),
            _ => {
                let body = response.text();
                let verdict = endpoint.parse.evaluate(
                    &PageInput {
                        status,
                        body: &body,
                        final_url: Some(response.url.as_str()),
                    },
                    username,
                );
                let ceiling = platform.ceiling(kind);
                let confidence = if verdict.status.is_definitive() {
                    verdict.signal.min(ceiling)
                } else {
                    verdict.signal.min(ceiling).min(0.5)
                };
                let mut outcome =
                    AttemptOutcome::new(kind, verdict.status, confidence).with_matched(verdict.matched);
                if verdict.status == AttemptStatus::Taken {
                    outcome.metadata = platform.capture_metadata(&body);
                }
                outcome
            }
        };
        Ok(outcome.with_http_status(status))
    }
}
