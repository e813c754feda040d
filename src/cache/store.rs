//! Append-only, content-addressed byte cache on local disk.
//!
//! Every entry lives at `{root}/{c0}/{c1}/{c2}/{rest}` where `c0..c2` are the
//! first three characters of the key digest and `rest` is the remainder.
//! Three single-character levels keep the number of entries per directory
//! bounded even with millions of keys.
//!
//! # Concurrency
//!
//! There is no single-flight: two concurrent misses on the same key both run
//! their computation and both write. Writes go through a uniquely named
//! temporary file that is renamed into place, so a reader sees either the
//! old entry, the new entry, or nothing, and the last writer wins.

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tracing::debug;

use super::key::CacheKey;
use crate::error::CacheError;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

// =============================================================================
// Content Cache
// =============================================================================

/// Disk-backed cache mapping request keys (usually URLs) to byte blobs.
///
/// Entries are never evicted or expired. [`invalidate`](Self::invalidate)
/// exists for removing an entry that should not have been stored, such as
/// an archive error page.
///
/// # Example
///
/// ```no_run
/// use dezoom_cache::cache::{CacheKey, ContentCache};
/// use bytes::Bytes;
///
/// #[tokio::main]
/// async fn main() {
///     let cache = ContentCache::new("/tmp/dezoom-cache");
///     let key = CacheKey::of("http://example.com/page.xml");
///
///     let body = cache
///         .get_or_compute(&key, || async {
///             Ok::<_, dezoom_cache::CacheError>(Bytes::from_static(b"<xml/>"))
///         })
///         .await
///         .unwrap();
///     assert_eq!(&body[..], b"<xml/>");
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ContentCache {
    root: PathBuf,
}

impl ContentCache {
    /// Create a cache rooted at `root`. Directories are created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// On-disk location of `key`. Pure; touches no files.
    pub fn path(&self, key: &CacheKey) -> PathBuf {
        let ([a, b, c], rest) = key.shards();
        self.root.join(a).join(b).join(c).join(rest)
    }

    /// On-disk location of the entry for an arbitrary string key.
    pub fn path_for(&self, input: &str) -> PathBuf {
        self.path(&CacheKey::of(input))
    }

    /// Ensure the shard directories of `key` exist and return its path.
    pub async fn prepare(&self, key: &CacheKey) -> Result<PathBuf, CacheError> {
        let path = self.path(key);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| CacheError::io(dir, e))?;
        }
        Ok(path)
    }

    /// Read a cached blob. Returns `Ok(None)` when the entry does not exist.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, CacheError> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    /// Check whether an entry exists without reading it.
    pub async fn contains(&self, key: &CacheKey) -> bool {
        tokio::fs::metadata(self.path(key))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Store `value` under `key`, replacing any existing entry.
    pub async fn put(&self, key: &CacheKey, value: &[u8]) -> Result<(), CacheError> {
        let path = self.prepare(key).await?;
        let temp = temp_path(&path);

        if let Err(e) = tokio::fs::write(&temp, value).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(CacheError::io(temp, e));
        }
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(CacheError::io(path, e));
        }

        debug!(key = %key, bytes = value.len(), "cache entry written");
        Ok(())
    }

    /// Reserve a staging file beside the entry for `key`.
    ///
    /// Writers that produce an entry through a file path, rather than bytes,
    /// write here and then [`commit`](Self::commit). Nothing is visible under
    /// `key` until the commit.
    pub async fn stage(&self, key: &CacheKey) -> Result<PathBuf, CacheError> {
        let path = self.prepare(key).await?;
        Ok(temp_path(&path))
    }

    /// Rename a staged file into place as the entry for `key`.
    ///
    /// Returns `Ok(false)` when nothing was staged.
    pub async fn commit(&self, staged: &Path, key: &CacheKey) -> Result<bool, CacheError> {
        let path = self.path(key);
        match tokio::fs::rename(staged, &path).await {
            Ok(()) => {
                debug!(key = %key, "staged cache entry committed");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => {
                let _ = tokio::fs::remove_file(staged).await;
                Err(CacheError::io(path, e))
            }
        }
    }

    /// Drop a staged file without committing it.
    pub async fn discard(&self, staged: &Path) {
        let _ = tokio::fs::remove_file(staged).await;
    }

    /// Return the cached blob for `key`, or run `compute`, store its output
    /// and return it.
    ///
    /// A failed computation stores nothing. Concurrent misses on the same key
    /// may each run `compute`.
    pub async fn get_or_compute<F, Fut, E>(&self, key: &CacheKey, compute: F) -> Result<Bytes, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, E>>,
        E: From<CacheError>,
    {
        if let Some(hit) = self.get(key).await? {
            return Ok(hit);
        }

        let value = compute().await?;
        self.put(key, &value).await?;
        Ok(value)
    }

    /// Delete the entry for `key`. Missing entries and I/O failures are ignored.
    pub async fn invalidate(&self, key: &CacheKey) {
        if tokio::fs::remove_file(self.path(key)).await.is_ok() {
            debug!(key = %key, "cache entry invalidated");
        }
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut name = path.file_name().map(|s| s.to_owned()).unwrap_or_default();
    name.push(format!(".tmp-{}-{}", std::process::id(), n));
    path.with_file_name(name)
}

// =============================================================================
// Tests
// =============================================================================
