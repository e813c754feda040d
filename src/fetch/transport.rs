use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::FetchError;

/// A single HTTP response as seen by the fetch client.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,

    /// Raw `Location` header, if any
    pub location: Option<String>,

    /// Response body
    pub body: Bytes,
}

impl HttpResponse {
    /// A `200 OK` response with the given body.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self {
            status: 200,
            location: None,
            body: body.into(),
        }
    }

    /// A redirect response pointing at `location`.
    pub fn redirect(status: u16, location: impl Into<String>) -> Self {
        Self {
            status,
            location: Some(location.into()),
            body: Bytes::new(),
        }
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Trait for issuing one plain HTTP GET without following redirects.
///
/// Redirects and retries are handled by [`FetchClient`](super::FetchClient),
/// so implementations must report them as-is. A timeout on either the
/// connect or the read phase must surface as [`FetchError::Timeout`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpResponse, FetchError>;
}

// =============================================================================
// Reqwest Transport
// =============================================================================

/// HTTP transport backed by one `reqwest` client and its connection pool.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a client with separate open (connect) and read timeouts.
    pub fn new(open_timeout: Duration, read_timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(open_timeout)
            .read_timeout(read_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                }
            } else {
                FetchError::Connection {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        };

        let response = self.client.get(url).send().await.map_err(map_err)?;

        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = response.bytes().await.map_err(map_err)?;

        Ok(HttpResponse {
            status,
            location,
            body,
        })
    }
}
