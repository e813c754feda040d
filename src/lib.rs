//! # dezoom-cache
//!
//! Fetches deep-zoom images from a document archive and reassembles them into
//! full-resolution rasters.
//!
//! The archive serves large page scans as zoomify pyramids: hundreds of small
//! JPEG tiles spread over numbered tile groups. This library resolves the
//! pyramid, downloads the finest level concurrently and stitches it back
//! together. Every response is memoized on disk, so repeated runs are cheap
//! and interrupted batches resume where they stopped.
//!
//! ## Features
//!
//! - **Content-addressed cache**: SHA-256 keyed, sharded on-disk store with get-or-compute
//! - **Worker pool**: fixed number of tile downloaders, each with its own connection pool
//! - **Resilient fetching**: timeout retries, bounded redirects, HTML error page detection
//! - **Tile pyramids**: zoom level and tile-group math for zoomify descriptors
//!
//! ## Architecture
//!
//! - [`cache`] - On-disk content cache
//! - [`pool`] - Worker pool with a batch barrier
//! - [`fetch`] - HTTP client and cache-backed archive access
//! - [`tile`] - Descriptor resolution, assembly and compositing
//! - [`ledger`] - Receipts of assembled images
//! - [`batch`] - Batch driver
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use dezoom_cache::{AssemblerConfig, ContentCache, FetchOptions, ImageAssembler};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = Arc::new(ContentCache::new("/tmp/dezoom-cache"));
//!     let assembler =
//!         ImageAssembler::new(cache, FetchOptions::default(), AssemblerConfig::default())?;
//!
//!     let image = assembler
//!         .assemble("http://www.bach-digital.de/servlets/MCRDFGServlet/src/D-B_P_180/00000001.jpg.zip")
//!         .await?;
//!     println!("{} bytes", image.data.len());
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod ledger;
pub mod pool;
pub mod tile;

// Re-export commonly used types
pub use batch::{parse_pages, BatchReport, BatchRunner, Page};
pub use cache::{CacheKey, ContentCache};
pub use config::{AssembleConfig, ArchiveArgs, CacheConfig, Cli, Command, FetchConfig};
pub use error::{
    ArchiveError, AssembleError, BatchError, CacheError, DescriptorError, FetchError,
    LedgerError,
};
pub use fetch::{CachedFetcher, FetchClient, FetchOptions, HttpResponse, HttpTransport};
pub use ledger::{Receipt, ReceiptLedger};
pub use pool::{JoinSummary, TaskError, WorkerPool};
pub use tile::{
    resolve, AssemblerConfig, CompositeFailurePolicy, Compositor, ImageAssembler, ImageResponse,
    JpegCompositor, TileDescriptor, TiledImagePattern,
};
