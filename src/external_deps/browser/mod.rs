//! Page rendering capability.
//!
//! Browser strategies drive a [`PageRenderer`]; the real browser engine
//! lives outside this crate. [`StaticPageRenderer`] is a JavaScript-free
//! fallback that fetches markup over HTTP.

mod static_renderer;

pub use static_renderer::StaticPageRenderer;

use std::time::Duration;

use async_trait::async_trait;
use http::HeaderMap;
use thiserror::Error;
use url::Url;

use crate::external_deps::captcha::ChallengeImage;

/// Everything a renderer needs to open one page.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub url: Url,
    pub user_agent: String,
    pub headers: HeaderMap,
    pub viewport: (u16, u16),
    pub locale: String,
    pub timezone: String,
    pub proxy: Option<String>,
    /// Apply anti-automation countermeasures (webdriver flags, plugin
    /// arrays, canvas noise).
    pub stealth: bool,
    pub timeout: Duration,
}

/// Interstitial found on a rendered page.
#[derive(Debug, Clone, PartialEq)]
pub enum ChallengeArtifact {
    /// Text CAPTCHA that can be answered by the solver.
    Image(ChallengeImage),
    /// Widget that cannot be answered with text (Turnstile, hCaptcha, ...).
    Interactive { provider: String },
}

#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub url: Url,
    pub status: u16,
    pub html: String,
    pub challenge: Option<ChallengeArtifact>,
}

#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("render timed out after {0:?}")]
    Timeout(Duration),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("challenge submission failed: {0}")]
    Submission(String),
    #[error("renderer unavailable: {0}")]
    Unavailable(String),
}

impl RenderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RenderError::Timeout(_) | RenderError::Navigation(_))
    }
}

#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> Result<RenderedPage, RenderError>;

    /// Types `answer` into the page's challenge and returns the page that
    /// results. A page that still carries a challenge means the answer was
    /// rejected.
    async fn submit_challenge(
        &self,
        page: &RenderedPage,
        answer: &str,
    ) -> Result<RenderedPage, RenderError>;
}
