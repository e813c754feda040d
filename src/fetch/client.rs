//! Retrying, redirect-following HTTP GET client.
//!
//! The archive is slow and flaky. Each request is retried on timeout a fixed
//! number of times with no delay; when every attempt times out the client
//! logs it and returns an empty body instead of an error. Callers must treat
//! an empty body as "unavailable".
//!
//! 301/302 responses are followed by re-issuing the request against the
//! `Location` header (cut at the first `;`), resolved against the configured
//! base URL when relative. The number of hops is capped.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};
use url::Url;

use super::transport::{HttpResponse, HttpTransport, ReqwestTransport};
use crate::error::FetchError;

/// Default connect timeout.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Default read timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Additional attempts after a timeout.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Redirect hops followed before giving up.
pub const DEFAULT_MAX_REDIRECTS: usize = 5;

/// Base used to resolve relative redirect locations.
pub const DEFAULT_BASE_URL: &str = "http://www.bach-digital.de";

// =============================================================================
// Fetch Options
// =============================================================================

/// Connection and retry settings shared by every client of one run.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub open_timeout: Duration,
    pub read_timeout: Duration,
    pub max_retries: u32,
    pub max_redirects: usize,

    /// Relative redirects are resolved against this; when `None`, against
    /// the URL that produced the redirect.
    pub base_url: Option<Url>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            base_url: Url::parse(DEFAULT_BASE_URL).ok(),
        }
    }
}

// =============================================================================
// Fetch Client
// =============================================================================

/// HTTP GET client with timeout retries and bounded redirect following.
///
/// Cloning shares the underlying transport. To keep connections partitioned
/// per worker, build a separate client per worker with [`FetchClient::new`].
#[derive(Clone)]
pub struct FetchClient {
    transport: Arc<dyn HttpTransport>,
    options: FetchOptions,
}

impl FetchClient {
    /// Create a client with its own `reqwest` connection pool.
    pub fn new(options: FetchOptions) -> Result<Self, FetchError> {
        let transport = ReqwestTransport::new(options.open_timeout, options.read_timeout)?;
        Ok(Self::with_transport(Arc::new(transport), options))
    }

    /// Create a client over an arbitrary transport.
    pub fn with_transport(transport: Arc<dyn HttpTransport>, options: FetchOptions) -> Self {
        Self { transport, options }
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// GET `url`, following redirects.
    ///
    /// Returns an empty body when every attempt of some hop timed out.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Status`] for any non-success, non-redirect status
    /// - [`FetchError::TooManyRedirects`] when the hop limit is exceeded
    /// - [`FetchError::InvalidRedirect`] when a redirect has no usable location
    /// - [`FetchError::Connection`] for other transport failures
    pub async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let mut current = url.to_string();
        let mut hops = 0;

        loop {
            let Some(response) = self.get_with_retry(&current).await? else {
                return Ok(Bytes::new());
            };

            if response.is_redirect() {
                if hops == self.options.max_redirects {
                    return Err(FetchError::TooManyRedirects {
                        url: url.to_string(),
                        limit: self.options.max_redirects,
                    });
                }
                hops += 1;

                let next = self.resolve_location(&current, &response)?;
                debug!(from = %current, to = %next, status = response.status, "following redirect");
                current = next;
                continue;
            }

            if !response.is_success() {
                return Err(FetchError::Status {
                    url: current,
                    status: response.status,
                });
            }

            return Ok(response.body);
        }
    }

    /// Issue one request, retrying on timeout. `Ok(None)` means the retry
    /// budget ran out.
    async fn get_with_retry(&self, url: &str) -> Result<Option<HttpResponse>, FetchError> {
        let mut retries = 0;
        loop {
            match self.transport.get(url).await {
                Ok(response) => return Ok(Some(response)),
                Err(FetchError::Timeout { .. }) if retries < self.options.max_retries => {
                    retries += 1;
                    debug!(url, attempt = retries + 1, "timeout, retrying");
                }
                Err(FetchError::Timeout { .. }) => {
                    warn!(url, attempts = retries + 1, "timeout while getting resource");
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn resolve_location(&self, current: &str, response: &HttpResponse) -> Result<String, FetchError> {
        let invalid = |reason: String| FetchError::InvalidRedirect {
            url: current.to_string(),
            reason,
        };

        let raw = response
            .location
            .as_deref()
            .ok_or_else(|| invalid("missing Location header".to_string()))?;
        let location = raw.split(';').next().unwrap_or_default().trim();
        if location.is_empty() {
            return Err(invalid("empty Location header".to_string()));
        }

        if let Ok(absolute) = Url::parse(location) {
            return Ok(absolute.to_string());
        }

        let base = match &self.options.base_url {
            Some(base) => base.clone(),
            None => Url::parse(current).map_err(|e| invalid(e.to_string()))?,
        };
        base.join(location)
            .map(|u| u.to_string())
            .map_err(|e| invalid(e.to_string()))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Transport that replays a script of results and records requested URLs.
    pub(crate) struct ScriptedTransport {
        script: Mutex<VecDeque<Result<HttpResponse, FetchError>>>,
        requests: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(script: Vec<Result<HttpResponse, FetchError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
            self.requests.lock().unwrap().push(url.to_string());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::Timeout { url: url.to_string() }))
        }
    }

    fn timeout() -> Result<HttpResponse, FetchError> {
        Err(FetchError::Timeout {
            url: "scripted".to_string(),
        })
    }

    fn client(transport: Arc<ScriptedTransport>) -> FetchClient {
        FetchClient::with_transport(transport, FetchOptions::default())
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let transport = ScriptedTransport::new(vec![Ok(HttpResponse::ok("hello"))]);
        let body = client(transport.clone()).fetch("http://a/x").await.unwrap();

        assert_eq!(&body[..], b"hello");
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_three_timeouts_then_success() {
        let transport = ScriptedTransport::new(vec![
            timeout(),
            timeout(),
            timeout(),
            Ok(HttpResponse::ok("finally")),
        ]);
        let body = client(transport.clone()).fetch("http://a/x").await.unwrap();

        assert_eq!(&body[..], b"finally");
        assert_eq!(transport.requests(), vec!["http://a/x"; 4]);
    }

    #[tokio::test]
    async fn test_always_timeout_returns_empty_after_four_attempts() {
        let transport = ScriptedTransport::new(vec![]);
        let body = client(transport.clone()).fetch("http://a/x").await.unwrap();

        assert!(body.is_empty());
        assert_eq!(transport.requests().len(), 4);
    }

    #[tokio::test]
    async fn test_connection_error_is_not_retried() {
        let transport = ScriptedTransport::new(vec![Err(FetchError::Connection {
            url: "http://a/x".to_string(),
            message: "refused".to_string(),
        })]);
        let result = client(transport.clone()).fetch("http://a/x").await;

        assert!(matches!(result, Err(FetchError::Connection { .. })));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_relative_redirect_uses_base_url() {
        let transport = ScriptedTransport::new(vec![
            Ok(HttpResponse::redirect(302, "/servlets/Tile;jsessionid=ABC")),
            Ok(HttpResponse::ok("moved")),
        ]);
        let body = client(transport.clone())
            .fetch("http://www.bach-digital.de/receive/x")
            .await
            .unwrap();

        assert_eq!(&body[..], b"moved");
        assert_eq!(
            transport.requests(),
            vec![
                "http://www.bach-digital.de/receive/x".to_string(),
                "http://www.bach-digital.de/servlets/Tile".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_relative_redirect_without_base_uses_current_url() {
        let transport = ScriptedTransport::new(vec![
            Ok(HttpResponse::redirect(301, "other")),
            Ok(HttpResponse::ok("ok")),
        ]);
        let options = FetchOptions {
            base_url: None,
            ..FetchOptions::default()
        };
        FetchClient::with_transport(transport.clone(), options)
            .fetch("http://host/dir/page")
            .await
            .unwrap();

        assert_eq!(transport.requests()[1], "http://host/dir/other");
    }

    #[tokio::test]
    async fn test_absolute_redirect_and_chain() {
        let transport = ScriptedTransport::new(vec![
            Ok(HttpResponse::redirect(301, "http://b/one")),
            Ok(HttpResponse::redirect(302, "http://c/two")),
            Ok(HttpResponse::ok("end")),
        ]);
        let body = client(transport.clone()).fetch("http://a/start").await.unwrap();

        assert_eq!(&body[..], b"end");
        assert_eq!(transport.requests()[2], "http://c/two");
    }

    #[tokio::test]
    async fn test_redirect_loop_is_capped() {
        let script = (0..10)
            .map(|_| Ok(HttpResponse::redirect(302, "http://a/loop")))
            .collect();
        let transport = ScriptedTransport::new(script);
        let result = client(transport.clone()).fetch("http://a/loop").await;

        assert!(matches!(
            result,
            Err(FetchError::TooManyRedirects { limit: DEFAULT_MAX_REDIRECTS, .. })
        ));
        assert_eq!(transport.requests().len(), DEFAULT_MAX_REDIRECTS + 1);
    }

    #[tokio::test]
    async fn test_redirect_without_location() {
        let transport = ScriptedTransport::new(vec![Ok(HttpResponse {
            status: 302,
            location: None,
            body: Bytes::new(),
        })]);
        let result = client(transport).fetch("http://a/x").await;
        assert!(matches!(result, Err(FetchError::InvalidRedirect { .. })));
    }

    #[tokio::test]
    async fn test_error_status() {
        let transport = ScriptedTransport::new(vec![Ok(HttpResponse {
            status: 404,
            location: None,
            body: Bytes::from_static(b"not here"),
        })]);
        let result = client(transport).fetch("http://a/x").await;
        assert!(matches!(result, Err(FetchError::Status { status: 404, .. })));
    }

    #[tokio::test]
    async fn test_retry_budget_is_per_hop() {
        let transport = ScriptedTransport::new(vec![
            timeout(),
            timeout(),
            Ok(HttpResponse::redirect(302, "http://a/next")),
            timeout(),
            timeout(),
            timeout(),
            Ok(HttpResponse::ok("done")),
        ]);
        let body = client(transport.clone()).fetch("http://a/x").await.unwrap();

        assert_eq!(&body[..], b"done");
        assert_eq!(transport.requests().len(), 7);
    }
}
