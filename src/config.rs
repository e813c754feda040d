//! Configuration management for dezoom-cache.
//!
//! This module provides the command-line interface:
//! - Command-line arguments via clap
//! - Environment variables with `DEZOOM_` prefix
//! - Defaults matching the archive's observed behavior
//!
//! # Environment Variables
//!
//! The shared archive options can be set via environment variables:
//!
//! - `DEZOOM_CACHE_DIR` - Cache root (default: `<tmp>/dezoom-cache`)
//! - `DEZOOM_WORKERS` - Concurrent tile downloads (default: 10)
//! - `DEZOOM_OPEN_TIMEOUT` - Connect timeout in seconds (default: 30)
//! - `DEZOOM_READ_TIMEOUT` - Read timeout in seconds (default: 30)
//! - `DEZOOM_MAX_RETRIES` - Retries after a timeout (default: 3)
//! - `DEZOOM_MAX_REDIRECTS` - Redirect hops per request (default: 5)
//! - `DEZOOM_BASE_URL` - Base for relative redirects
//! - `DEZOOM_TILED_PATTERN` - Regex recognizing tiled image URLs
//! - `DEZOOM_ZOOMIFY_TEMPLATE` - Canonical zoomify URL template

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use url::Url;

use crate::fetch::{
    FetchOptions, DEFAULT_BASE_URL, DEFAULT_MAX_REDIRECTS, DEFAULT_MAX_RETRIES,
};
use crate::pool::DEFAULT_WORKER_COUNT;
use crate::tile::{
    is_valid_quality, AssemblerConfig, CompositeFailurePolicy, TiledImagePattern,
    DEFAULT_JPEG_QUALITY, DEFAULT_TILED_PATTERN, DEFAULT_ZOOMIFY_TEMPLATE,
};

// =============================================================================
// Default Values
// =============================================================================

/// Default connect and read timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Name of the cache directory created under the system temp dir.
pub const DEFAULT_CACHE_DIR_NAME: &str = "dezoom-cache";

// =============================================================================
// CLI Structure
// =============================================================================

/// dezoom-cache - Fetch and reassemble deep-zoom images from a document archive.
///
/// Every network response is memoized on disk, so interrupted batches can be
/// resumed cheaply.
#[derive(Parser, Debug, Clone)]
#[command(name = "dezoom-cache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Assemble a batch of images
    Assemble(AssembleConfig),

    /// Download a single resource through the cache
    Fetch(FetchConfig),

    /// Inspect or invalidate a cache entry
    Cache(CacheConfig),
}

// =============================================================================
// Shared Archive Options
// =============================================================================

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct ArchiveArgs {
    /// Cache root directory.
    #[arg(long, env = "DEZOOM_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Number of concurrent tile downloads.
    #[arg(long, default_value_t = DEFAULT_WORKER_COUNT, env = "DEZOOM_WORKERS")]
    pub workers: usize,

    /// Connect timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, env = "DEZOOM_OPEN_TIMEOUT")]
    pub open_timeout: u64,

    /// Read timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, env = "DEZOOM_READ_TIMEOUT")]
    pub read_timeout: u64,

    /// Retries after a timed-out request.
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES, env = "DEZOOM_MAX_RETRIES")]
    pub max_retries: u32,

    /// Redirect hops followed per request.
    #[arg(long, default_value_t = DEFAULT_MAX_REDIRECTS, env = "DEZOOM_MAX_REDIRECTS")]
    pub max_redirects: usize,

    /// Base URL that relative redirects are resolved against.
    #[arg(long, default_value = DEFAULT_BASE_URL, env = "DEZOOM_BASE_URL")]
    pub base_url: String,

    /// Regex recognizing tiled image URLs; group 1 is the image id.
    #[arg(long, default_value = DEFAULT_TILED_PATTERN, env = "DEZOOM_TILED_PATTERN")]
    pub tiled_pattern: String,

    /// Canonical zoomify base URL, `{}` replaced by the image id.
    #[arg(long, default_value = DEFAULT_ZOOMIFY_TEMPLATE, env = "DEZOOM_ZOOMIFY_TEMPLATE")]
    pub zoomify_template: String,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl ArchiveArgs {
    /// Validate the options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be greater than 0".to_string());
        }
        if self.open_timeout == 0 || self.read_timeout == 0 {
            return Err("timeouts must be greater than 0 seconds".to_string());
        }
        if Url::parse(&self.base_url).is_err() {
            return Err(format!("base_url is not a valid URL: {}", self.base_url));
        }
        self.pattern()?;
        Ok(())
    }

    /// Cache root, defaulting to a directory under the system temp dir.
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_CACHE_DIR_NAME))
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            open_timeout: Duration::from_secs(self.open_timeout),
            read_timeout: Duration::from_secs(self.read_timeout),
            max_retries: self.max_retries,
            max_redirects: self.max_redirects,
            base_url: Url::parse(&self.base_url).ok(),
        }
    }

    pub fn pattern(&self) -> Result<TiledImagePattern, String> {
        TiledImagePattern::new(&self.tiled_pattern, self.zoomify_template.clone())
    }
}

// =============================================================================
// Assemble Command
// =============================================================================

/// Configuration for the `assemble` subcommand.
#[derive(Args, Debug, Clone)]
pub struct AssembleConfig {
    #[command(flatten)]
    pub archive: ArchiveArgs,

    /// Image URLs to assemble.
    pub urls: Vec<String>,

    /// File with one page per line (`#` starts a comment).
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Directory the assembled images are written to.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Receipts ledger; recorded pages still in the cache are skipped.
    #[arg(long, env = "DEZOOM_LEDGER")]
    pub ledger: Option<PathBuf>,

    /// Keep tile entries in the cache after compositing.
    #[arg(long, default_value_t = false)]
    pub keep_tiles: bool,

    /// What to do with a composite that had problems.
    #[arg(long, value_enum, default_value_t = CompositeFailurePolicy::Keep)]
    pub composite_failure: CompositeFailurePolicy,

    /// JPEG quality of composites (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "DEZOOM_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    /// Treat whitespace-separated URLs on one input line as alternates of one page.
    #[arg(long, default_value_t = false)]
    pub alternates: bool,
}

impl AssembleConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.archive.validate()?;

        if self.urls.is_empty() && self.input.is_none() {
            return Err("Nothing to assemble. Pass URLs or --input <FILE>".to_string());
        }

        if !is_valid_quality(self.jpeg_quality) {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }

        Ok(())
    }

    pub fn assembler_config(&self) -> Result<AssemblerConfig, String> {
        Ok(AssemblerConfig {
            workers: self.archive.workers,
            pattern: self.archive.pattern()?,
            composite_failure: self.composite_failure,
            keep_tiles: self.keep_tiles,
            jpeg_quality: self.jpeg_quality,
        })
    }
}

// =============================================================================
// Fetch Command
// =============================================================================

/// Configuration for the `fetch` subcommand.
#[derive(Args, Debug, Clone)]
pub struct FetchConfig {
    #[command(flatten)]
    pub archive: ArchiveArgs,

    /// URL to download.
    pub url: String,

    /// Expect XML and reject HTML error pages.
    #[arg(long, default_value_t = false)]
    pub xml: bool,

    /// Write the body here instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl FetchConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.archive.validate()?;
        if Url::parse(&self.url).is_err() {
            return Err(format!("not a valid URL: {}", self.url));
        }
        Ok(())
    }
}

// =============================================================================
// Cache Command
// =============================================================================

/// Configuration for the `cache` subcommand.
#[derive(Args, Debug, Clone)]
pub struct CacheConfig {
    #[command(flatten)]
    pub archive: ArchiveArgs,

    /// Cache key, usually a URL.
    pub key: String,

    /// Delete the entry.
    #[arg(long, default_value_t = false)]
    pub invalidate: bool,
}

// =============================================================================
// Tests
// =============================================================================
