//! HTTP transport used by the HTTP and API strategies.
//!
//! Strategies talk to a [`ProbeHttpClient`] rather than to reqwest directly
//! so tests can script responses and callers can plug in their own stack.

mod reqwest_client;

pub use reqwest_client::ReqwestProbeClient;

use std::borrow::Cow;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{HeaderMap, Method};
use thiserror::Error;
use url::Url;

/// One outbound probe.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub proxy: Option<String>,
    pub timeout: Duration,
}

impl ProbeRequest {
    pub fn get(url: Url, timeout: Duration) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            proxy: None,
            timeout,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }
}

/// Response as seen by strategies.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub url: Url,
}

impl ProbeResponse {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Delay requested through `Retry-After`, either seconds or an HTTP date.
    pub fn retry_after(&self) -> Option<Duration> {
        let raw = self.headers.get(http::header::RETRY_AFTER)?.to_str().ok()?.trim();
        if let Ok(seconds) = raw.parse::<f64>()
            && seconds.is_finite()
            && seconds >= 0.0
        {
            return Some(Duration::from_secs_f64(seconds));
        }

        DateTime::parse_from_rfc2822(raw)
            .or_else(|_| DateTime::parse_from_rfc3339(raw))
            .ok()
            .and_then(|date| (date.with_timezone(&Utc) - Utc::now()).to_std().ok())
    }
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl TransportError {
    /// Timeouts and connection failures are worth another try.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Timeout(_) | TransportError::Connect(_))
    }
}

#[async_trait]
pub trait ProbeHttpClient: Send + Sync {
    async fn fetch(&self, request: ProbeRequest) -> Result<ProbeResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn response_with(header: &str) -> ProbeResponse {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::RETRY_AFTER, HeaderValue::from_str(header).unwrap());
        ProbeResponse {
            status: 429,
            headers,
            body: Bytes::new(),
            url: Url::parse("https://example.com").unwrap(),
        }
    }

    #[test]
    fn parses_retry_after_seconds() {
        assert_eq!(response_with("7").retry_after(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn ignores_past_dates() {
        assert_eq!(response_with("Wed, 21 Oct 2015 07:28:00 GMT").retry_after(), None);
    }

    #[test]
    fn retryable_errors() {
        assert!(TransportError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!TransportError::InvalidRequest("bad".into()).is_retryable());
    }
}
