//! Scripted doubles shared by the strategy unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use tokio::time::{Duration, Instant};
use url::Url;

use super::AttemptContext;
use crate::external_deps::browser::{PageRenderer, RenderError, RenderRequest, RenderedPage};
use crate::modules::spoofing::{Fingerprint, FingerprintGenerator, FingerprintProvider};
use crate::platforms::{ParseRule, PlatformDescriptor, PlatformSpec};
use crate::strategies::StrategyKind;
use crate::transport::{ProbeHttpClient, ProbeRequest, ProbeResponse, TransportError};
use crate::username::{Username, UsernamePolicy};

pub(crate) fn username(raw: &str) -> Username {
    Username::parse(raw, &UsernamePolicy::default()).unwrap()
}

pub(crate) fn fingerprint() -> Fingerprint {
    FingerprintGenerator::default().generate()
}

pub(crate) fn context(fingerprint: &Fingerprint) -> AttemptContext<'_> {
    AttemptContext {
        fingerprint,
        proxy: None,
        deadline: Instant::now() + Duration::from_secs(10),
        captcha_enabled: true,
        captcha_attempts: 3,
    }
}

pub(crate) fn status_platform(strategies: Vec<StrategyKind>) -> PlatformDescriptor {
    PlatformSpec::new(
        "example",
        "https://example.com/{username}",
        strategies,
        ParseRule::status_code(),
    )
    .try_into()
    .unwrap()
}

pub(crate) fn response(status: u16, body: &str) -> ProbeResponse {
    ProbeResponse {
        status,
        headers: HeaderMap::new(),
        body: Bytes::from(body.to_string()),
        url: Url::parse("https://example.com/probe").unwrap(),
    }
}

/// Hands out queued responses in order and records every request.
#[derive(Default)]
pub(crate) struct ScriptedClient {
    responses: Mutex<VecDeque<Result<ProbeResponse, TransportError>>>,
    pub(crate) requests: Mutex<Vec<ProbeRequest>>,
}

impl ScriptedClient {
    pub(crate) fn new(
        responses: impl IntoIterator<Item = Result<ProbeResponse, TransportError>>,
    ) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ProbeHttpClient for ScriptedClient {
    async fn fetch(&self, request: ProbeRequest) -> Result<ProbeResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Connect("script exhausted".into())))
    }
}

/// Renders queued pages; submissions pop from a second queue.
#[derive(Default)]
pub(crate) struct ScriptedRenderer {
    pages: Mutex<VecDeque<Result<RenderedPage, RenderError>>>,
    submissions: Mutex<VecDeque<Result<RenderedPage, RenderError>>>,
    pub(crate) answers: Mutex<Vec<String>>,
    pub(crate) stealth_flags: Mutex<Vec<bool>>,
}

impl ScriptedRenderer {
    pub(crate) fn new(
        pages: impl IntoIterator<Item = Result<RenderedPage, RenderError>>,
        submissions: impl IntoIterator<Item = Result<RenderedPage, RenderError>>,
    ) -> Self {
        Self {
            pages: Mutex::new(pages.into_iter().collect()),
            submissions: Mutex::new(submissions.into_iter().collect()),
            answers: Mutex::new(Vec::new()),
            stealth_flags: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PageRenderer for ScriptedRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<RenderedPage, RenderError> {
        self.stealth_flags.lock().unwrap().push(request.stealth);
        self.pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(RenderError::Unavailable("script exhausted".into())))
    }

    async fn submit_challenge(
        &self,
        _page: &RenderedPage,
        answer: &str,
    ) -> Result<RenderedPage, RenderError> {
        self.answers.lock().unwrap().push(answer.to_string());
        self.submissions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(RenderError::Submission("script exhausted".into())))
    }
}

pub(crate) fn page(status: u16, html: &str) -> RenderedPage {
    RenderedPage {
        url: Url::parse("https://example.com/probe").unwrap(),
        status,
        html: html.to_string(),
        challenge: None,
    }
}
