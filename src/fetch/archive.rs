use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error};

use super::client::FetchClient;
use super::soft_error::{extract_error_message, is_html_page};
use crate::cache::{CacheKey, ContentCache};
use crate::error::{ArchiveError, FetchError};

/// Cache-backed access to archive resources.
///
/// Every download goes through [`ContentCache::get_or_compute`] keyed by the
/// URL. Empty bodies (every attempt timed out) are reported as
/// [`FetchError::Unavailable`] and never stored.
///
/// Cloning shares both the cache and the HTTP client. Worker pools give each
/// worker its own `CachedFetcher` built over its own [`FetchClient`].
#[derive(Clone)]
pub struct CachedFetcher {
    cache: Arc<ContentCache>,
    client: FetchClient,
}

impl CachedFetcher {
    pub fn new(cache: Arc<ContentCache>, client: FetchClient) -> Self {
        Self { cache, client }
    }

    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    pub fn client(&self) -> &FetchClient {
        &self.client
    }

    /// Download `url`, serving it from the cache when present.
    pub async fn download(&self, url: &str) -> Result<Bytes, ArchiveError> {
        let key = CacheKey::of(url);
        self.cache
            .get_or_compute(&key, || async {
                debug!(url, "cache miss, fetching");
                let body = self.client.fetch(url).await?;
                if body.is_empty() {
                    return Err(ArchiveError::Fetch(FetchError::Unavailable {
                        url: url.to_string(),
                    }));
                }
                Ok(body)
            })
            .await
    }

    /// Download an XML document, rejecting HTML error pages.
    ///
    /// An error page is logged with whatever message it carries and removed
    /// from the cache so a later run fetches the URL again.
    pub async fn xml(&self, url: &str) -> Result<String, ArchiveError> {
        let body = self.download(url).await?;

        if is_html_page(&body) {
            self.cache.invalidate(&CacheKey::of(url)).await;
            let message = extract_error_message(&body);
            match &message {
                Some(msg) => error!(url, message = %msg, "archive signaled an error"),
                None => error!(url, "archive returned an HTML page instead of XML"),
            }
            return Err(ArchiveError::SoftErrorPage {
                url: url.to_string(),
                message,
            });
        }

        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}
