//! Reqwest-based implementation of [`ProbeHttpClient`].
//!
//! Keeps one `reqwest::Client` per egress proxy so connection pools are
//! never shared across endpoints. Clients keep no cookie jar: attempts that
//! share a proxy must not be linked through session cookies.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::{Client, Proxy, Response, redirect::Policy};
use tokio::sync::Mutex;

use super::{ProbeHttpClient, ProbeRequest, ProbeResponse, TransportError};

const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Reqwest-backed probe client with a per-proxy client pool.
pub struct ReqwestProbeClient {
    max_redirects: usize,
    max_body_bytes: usize,
    connect_timeout: Duration,
    clients: Mutex<HashMap<Option<String>, Client>>,
}

impl ReqwestProbeClient {
    pub fn new() -> Result<Self, TransportError> {
        let pool = Self {
            max_redirects: 5,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            connect_timeout: Duration::from_secs(10),
            clients: Mutex::new(HashMap::new()),
        };
        // Fail at construction if TLS initialisation is broken.
        pool.build_client(None)?;
        Ok(pool)
    }

    /// Redirect limit; zero disables redirects so status codes such as 302
    /// reach the parse rule untouched.
    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// Bodies beyond this size are truncated before parsing.
    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn build_client(&self, proxy: Option<&str>) -> Result<Client, TransportError> {
        let redirect = if self.max_redirects == 0 {
            Policy::none()
        } else {
            Policy::limited(self.max_redirects)
        };
        let mut builder = Client::builder()
            .redirect(redirect)
            .connect_timeout(self.connect_timeout);
        if let Some(address) = proxy {
            let proxy = Proxy::all(address)
                .map_err(|err| TransportError::InvalidRequest(format!("proxy {address}: {err}")))?;
            builder = builder.proxy(proxy);
        } else {
            // Egress is managed by the proxy pool, not the environment.
            builder = builder.no_proxy();
        }
        builder
            .build()
            .map_err(|err| TransportError::Transport(err.to_string()))
    }

    async fn client_for(&self, proxy: Option<&String>) -> Result<Client, TransportError> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&proxy.cloned()) {
            return Ok(client.clone());
        }
        let client = self.build_client(proxy.map(String::as_str))?;
        clients.insert(proxy.cloned(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl ProbeHttpClient for ReqwestProbeClient {
    async fn fetch(&self, request: ProbeRequest) -> Result<ProbeResponse, TransportError> {
        let client = self.client_for(request.proxy.as_ref()).await?;
        let timeout = request.timeout;

        let response = client
            .request(request.method, request.url.as_str())
            .headers(request.headers)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| map_error(err, timeout))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = read_capped(response, self.max_body_bytes, timeout).await?;

        Ok(ProbeResponse {
            status,
            headers,
            body,
            url,
        })
    }
}

async fn read_capped(
    mut response: Response,
    limit: usize,
    timeout: Duration,
) -> Result<Bytes, TransportError> {
    let mut body = BytesMut::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|err| map_error(err, timeout))?
    {
        if !push_capped(&mut body, &chunk, limit) {
            log::debug!("{}: body truncated at {} bytes", response.url(), limit);
            break;
        }
    }
    Ok(body.freeze())
}

/// Appends `chunk` up to `limit`. Returns false once the body is full.
fn push_capped(body: &mut BytesMut, chunk: &[u8], limit: usize) -> bool {
    let room = limit.saturating_sub(body.len());
    if chunk.len() > room {
        body.extend_from_slice(&chunk[..room]);
        return false;
    }
    body.extend_from_slice(chunk);
    true
}

fn map_error(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout)
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else if err.is_builder() {
        TransportError::InvalidRequest(err.to_string())
    } else {
        TransportError::Transport(err.to_string())
    }
}
