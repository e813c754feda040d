//! Fetch client and cache-backed downloads over real HTTP.
//!
//! Tests verify:
//! - Relative redirects with session suffixes
//! - The redirect hop limit
//! - Status errors and timeouts never reach the cache

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use dezoom_cache::{
    ArchiveError, CacheKey, CachedFetcher, ContentCache, FetchClient, FetchError, FetchOptions,
};

use super::test_utils::{FakeArchive, Route};

fn options(archive: &FakeArchive) -> FetchOptions {
    FetchOptions {
        base_url: Some(Url::parse(archive.base()).unwrap()),
        ..FetchOptions::default()
    }
}

#[tokio::test]
async fn test_relative_redirect_with_session_suffix() {
    let archive = FakeArchive::start(vec![
        (
            "/servlets/old".to_string(),
            Route::Redirect("/servlets/new;jsessionid=0A1B2C".to_string()),
        ),
        ("/servlets/new".to_string(), Route::Body("moved".into())),
    ])
    .await;
    let client = FetchClient::new(options(&archive)).unwrap();

    let body = client.fetch(&archive.url("/servlets/old")).await.unwrap();

    assert_eq!(&body[..], b"moved");
    assert_eq!(archive.requests_for("/servlets/new"), 1);
}

#[tokio::test]
async fn test_redirect_loop_is_capped() {
    let archive = FakeArchive::start(vec![(
        "/loop".to_string(),
        Route::Redirect("/loop".to_string()),
    )])
    .await;
    let client = FetchClient::new(options(&archive)).unwrap();

    let result = client.fetch(&archive.url("/loop")).await;

    assert!(matches!(
        result,
        Err(FetchError::TooManyRedirects { limit: 5, .. })
    ));
    // The original request plus five hops
    assert_eq!(archive.requests_for("/loop"), 6);
}

#[tokio::test]
async fn test_status_error_is_not_cached() {
    let archive = FakeArchive::start(vec![("/down".to_string(), Route::Status(503))]).await;
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(ContentCache::new(dir.path()));
    let fetcher = CachedFetcher::new(cache, FetchClient::new(options(&archive)).unwrap());
    let url = archive.url("/down");

    let result = fetcher.download(&url).await;

    assert!(matches!(
        result,
        Err(ArchiveError::Fetch(FetchError::Status { status: 503, .. }))
    ));
    assert!(!fetcher.cache().contains(&CacheKey::of(&url)).await);
}

#[tokio::test]
async fn test_download_served_from_cache() {
    let archive =
        FakeArchive::start(vec![("/tile.jpg".to_string(), Route::Body("tile".into()))]).await;
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(ContentCache::new(dir.path()));
    let fetcher = CachedFetcher::new(cache, FetchClient::new(options(&archive)).unwrap());
    let url = archive.url("/tile.jpg");

    fetcher.download(&url).await.unwrap();
    fetcher.download(&url).await.unwrap();

    assert_eq!(archive.requests_for("/tile.jpg"), 1);
    assert!(dir.path().join(CacheKey::of(&url).shards().0.join("/")).is_dir());
}

#[tokio::test]
async fn test_stalled_endpoint_degrades_to_empty() {
    let archive = FakeArchive::start(vec![("/slow".to_string(), Route::Stall)]).await;
    let options = FetchOptions {
        read_timeout: Duration::from_millis(200),
        max_retries: 1,
        ..options(&archive)
    };
    let client = FetchClient::new(options.clone()).unwrap();

    let body = client.fetch(&archive.url("/slow")).await.unwrap();

    assert!(body.is_empty());
    assert_eq!(archive.requests_for("/slow"), 2);

    // Through the cache the empty body is an error and nothing is stored
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(ContentCache::new(dir.path()));
    let fetcher = CachedFetcher::new(cache, FetchClient::new(options).unwrap());
    let result = fetcher.download(&archive.url("/slow")).await;

    assert!(matches!(
        result,
        Err(ArchiveError::Fetch(FetchError::Unavailable { .. }))
    ));
    assert!(!fetcher.cache().contains(&CacheKey::of(&archive.url("/slow"))).await);
}
