//! Image assembly: descriptor, tile fan-out, compositing.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         ImageAssembler                          │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │                      assemble()                         │    │
//! │  │  1. Match tiled pattern   4. Fan out tile downloads     │    │
//! │  │  2. Check composite       5. Join and composite         │    │
//! │  │  3. Resolve descriptor    6. Drop tiles, return image   │    │
//! │  └─────────────────────────────────────────────────────────┘    │
//! │           │                    │                    │           │
//! │           ▼                    ▼                    ▼           │
//! │    ┌──────────────┐   ┌──────────────────┐  ┌──────────────┐    │
//! │    │ CachedFetcher│   │ WorkerPool       │  │  Compositor  │    │
//! │    └──────────────┘   └──────────────────┘  └──────────────┘    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheKey, ContentCache};
use crate::error::{AssembleError, FetchError};
use crate::fetch::{CachedFetcher, FetchClient, FetchOptions};
use crate::pool::{TaskError, WorkerPool, DEFAULT_WORKER_COUNT};

use super::compositor::{
    CompositeFailurePolicy, CompositeJob, Compositor, JpegCompositor, DEFAULT_JPEG_QUALITY,
};
use super::descriptor::resolve;
use super::pattern::TiledImagePattern;

// =============================================================================
// Configuration and Response
// =============================================================================

/// Assembly settings.
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// Number of concurrent tile downloads
    pub workers: usize,

    pub pattern: TiledImagePattern,

    pub composite_failure: CompositeFailurePolicy,

    /// Keep tile entries in the cache after compositing
    pub keep_tiles: bool,

    pub jpeg_quality: u8,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKER_COUNT,
            pattern: TiledImagePattern::default(),
            composite_failure: CompositeFailurePolicy::default(),
            keep_tiles: false,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Result of assembling one image.
#[derive(Debug, Clone)]
pub struct ImageResponse {
    /// The image bytes
    pub data: Bytes,

    /// Whether the image was served from the cache without network access
    pub cache_hit: bool,

    /// Whether the URL named a tiled image
    pub tiled: bool,

    /// Tiles that could not be fetched for this composite
    pub failed_tiles: usize,
}

// =============================================================================
// Image Assembler
// =============================================================================

/// Fetches images from the archive, reassembling tiled ones.
///
/// One assembler is shared for the whole run. Tiled assemblies are
/// serialized so that each one owns the worker pool between submitting its
/// tiles and joining them.
///
/// # Example
///
/// ```ignore
/// use dezoom_cache::cache::ContentCache;
/// use dezoom_cache::fetch::FetchOptions;
/// use dezoom_cache::tile::{AssemblerConfig, ImageAssembler};
/// use std::sync::Arc;
///
/// let cache = Arc::new(ContentCache::new("/tmp/dezoom-cache"));
/// let assembler = ImageAssembler::new(cache, FetchOptions::default(), AssemblerConfig::default())?;
///
/// let image = assembler.assemble(page_url).await?;
/// println!("{} bytes, cache hit: {}", image.data.len(), image.cache_hit);
/// ```
pub struct ImageAssembler {
    /// Fetcher for descriptors and single-resource images
    archive: CachedFetcher,

    /// Tile workers, each with its own HTTP client
    pool: WorkerPool<CachedFetcher>,

    compositor: Arc<dyn Compositor>,
    pattern: TiledImagePattern,
    composite_failure: CompositeFailurePolicy,
    keep_tiles: bool,
    batch: Mutex<()>,
}

impl ImageAssembler {
    /// Create an assembler whose workers each own a separate HTTP client.
    pub fn new(
        cache: Arc<ContentCache>,
        fetch: FetchOptions,
        config: AssemblerConfig,
    ) -> Result<Self, FetchError> {
        let archive = CachedFetcher::new(Arc::clone(&cache), FetchClient::new(fetch.clone())?);
        let workers = (0..config.workers.max(1))
            .map(|_| {
                FetchClient::new(fetch.clone())
                    .map(|client| CachedFetcher::new(Arc::clone(&cache), client))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::with_fetchers(archive, workers, config))
    }

    /// Create an assembler over prepared fetchers, one per worker.
    pub fn with_fetchers(
        archive: CachedFetcher,
        workers: Vec<CachedFetcher>,
        config: AssemblerConfig,
    ) -> Self {
        let workers = if workers.is_empty() {
            vec![archive.clone()]
        } else {
            workers
        };
        Self {
            compositor: Arc::new(JpegCompositor::new(config.jpeg_quality)),
            pool: WorkerPool::from_contexts(workers),
            archive,
            pattern: config.pattern,
            composite_failure: config.composite_failure,
            keep_tiles: config.keep_tiles,
            batch: Mutex::new(()),
        }
    }

    /// Replace the compositor.
    pub fn with_compositor(mut self, compositor: Arc<dyn Compositor>) -> Self {
        self.compositor = compositor;
        self
    }

    pub fn cache(&self) -> &Arc<ContentCache> {
        self.archive.cache()
    }

    pub fn pattern(&self) -> &TiledImagePattern {
        &self.pattern
    }

    /// Cache key under which the result for `url` is stored.
    ///
    /// Tiled images are keyed by their canonical zoomify URL, everything
    /// else by the URL itself.
    pub fn result_key(&self, url: &str) -> CacheKey {
        match self.pattern.canonicalize(url) {
            Some(base) => CacheKey::of(&base),
            None => CacheKey::of(url),
        }
    }

    /// Fetch one image, reassembling it from tiles when it is tiled.
    ///
    /// # Errors
    ///
    /// - [`AssembleError::Archive`] when the image or its descriptor cannot
    ///   be fetched, including soft error pages
    /// - [`AssembleError::Descriptor`] when the descriptor cannot be resolved
    /// - [`AssembleError::Composite`] when no composite was produced, or the
    ///   composite had problems and the policy is
    ///   [`CompositeFailurePolicy::Invalidate`]
    pub async fn assemble(&self, url: &str) -> Result<ImageResponse, AssembleError> {
        let Some(base) = self.pattern.canonicalize(url) else {
            let cache_hit = self.cache().contains(&CacheKey::of(url)).await;
            let data = self.archive.download(url).await?;
            debug!(url, bytes = data.len(), cache_hit, "single-resource image");
            return Ok(ImageResponse {
                data,
                cache_hit,
                tiled: false,
                failed_tiles: 0,
            });
        };

        let key = CacheKey::of(&base);
        if let Some(data) = self.cache().get(&key).await? {
            debug!(url, base = %base, "composite served from cache");
            return Ok(cached(data));
        }

        let _batch = self.batch.lock().await;

        // Another assembly of the same image may have finished while we waited
        if let Some(data) = self.cache().get(&key).await? {
            return Ok(cached(data));
        }

        self.assemble_tiled(url, &base, &key).await
    }

    /// Try several URLs of the same page, returning the first that works.
    pub async fn assemble_any<S: AsRef<str>>(
        &self,
        urls: &[S],
    ) -> Result<ImageResponse, AssembleError> {
        let mut last_error = AssembleError::NoCandidates;
        for url in urls {
            let url = url.as_ref();
            match self.assemble(url).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    warn!(url, error = %e, "candidate failed, trying next");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    /// Stop the tile workers.
    pub async fn shutdown(self) {
        self.pool.shutdown().await;
    }

    async fn assemble_tiled(
        &self,
        url: &str,
        base: &str,
        key: &CacheKey,
    ) -> Result<ImageResponse, AssembleError> {
        let cache = Arc::clone(self.cache());

        let descriptor_url = TiledImagePattern::descriptor_url(base);
        let xml = self.archive.xml(&descriptor_url).await?;
        let descriptor = resolve(&xml).map_err(|source| {
            error!(url = %descriptor_url, error = %source, "cannot resolve descriptor");
            AssembleError::Descriptor {
                url: descriptor_url.clone(),
                source,
            }
        })?;

        info!(
            url,
            width = descriptor.width(),
            height = descriptor.height(),
            zoom = descriptor.zoom_level(),
            tiles = descriptor.tile_count(),
            "assembling tiled image"
        );

        let mut tile_keys = Vec::with_capacity(descriptor.tile_count());
        for coord in descriptor.tiles() {
            let tile_url =
                TiledImagePattern::tile_url(base, &descriptor.tile_path(coord.x, coord.y));
            tile_keys.push(CacheKey::of(&tile_url));

            self.pool.submit(move |fetcher: Arc<CachedFetcher>| async move {
                let data = fetcher.download(&tile_url).await.map_err(TaskError::from)?;
                debug!(url = %tile_url, bytes = data.len(), "tile ready");
                Ok::<(), TaskError>(())
            });
        }

        let summary = self.pool.join().await;
        if summary.failed > 0 {
            warn!(
                url,
                failed = summary.failed,
                completed = summary.completed,
                "some tiles could not be fetched"
            );
        }

        // The composite is written to a staging file; readers only ever see
        // the committed entry.
        let staged = cache.stage(key).await?;
        let job = CompositeJob {
            tiles: tile_keys.iter().map(|k| cache.path(k)).collect(),
            tiles_wide: descriptor.tiles_wide(),
            tiles_high: descriptor.tiles_high(),
            tile_size: descriptor.tile_size(),
            destination: staged.clone(),
        };
        let compositor = Arc::clone(&self.compositor);
        let report = match tokio::task::spawn_blocking(move || compositor.composite(&job)).await {
            Ok(report) => report,
            Err(e) => {
                cache.discard(&staged).await;
                return Err(AssembleError::Join(e.to_string()));
            }
        };

        if !self.keep_tiles {
            for tile_key in &tile_keys {
                cache.invalidate(tile_key).await;
            }
        }

        if !report.is_clean() {
            let diagnostic = report.diagnostic();
            error!(url, diagnostic = %diagnostic, "compositing reported problems");
            if self.composite_failure == CompositeFailurePolicy::Invalidate {
                cache.discard(&staged).await;
                return Err(AssembleError::Composite {
                    url: url.to_string(),
                    diagnostic,
                });
            }
        }

        let no_composite = || AssembleError::Composite {
            url: url.to_string(),
            diagnostic: if report.is_clean() {
                "no composite was written".to_string()
            } else {
                report.diagnostic()
            },
        };

        if !cache.commit(&staged, key).await? {
            return Err(no_composite());
        }
        let data = cache.get(key).await?.ok_or_else(no_composite)?;

        info!(url, bytes = data.len(), "image assembled");
        Ok(ImageResponse {
            data,
            cache_hit: false,
            tiled: true,
            failed_tiles: summary.failed,
        })
    }
}

fn cached(data: Bytes) -> ImageResponse {
    ImageResponse {
        data,
        cache_hit: true,
        tiled: true,
        failed_tiles: 0,
    }
}

// =============================================================================
// Tests
// =============================================================================
