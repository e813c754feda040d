use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the on-disk content cache
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Reading, writing or creating directories under the cache root failed
    #[error("Cache I/O error at {}: {message}", path.display())]
    Io { path: PathBuf, message: String },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Errors that can occur when issuing HTTP requests against the archive
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Open or read timeout elapsed for a single attempt
    #[error("Timeout while fetching {url}")]
    Timeout { url: String },

    /// Network or connection error
    #[error("Connection error for {url}: {message}")]
    Connection { url: String, message: String },

    /// Server answered with a status that is neither success nor redirect
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    /// Redirect chain exceeded the configured number of hops
    #[error("Too many redirects starting at {url} (limit {limit})")]
    TooManyRedirects { url: String, limit: usize },

    /// Redirect response carried no usable Location header
    #[error("Invalid redirect from {url}: {reason}")]
    InvalidRedirect { url: String, reason: String },

    /// Every attempt timed out and the body came back empty
    #[error("Resource unavailable: {url}")]
    Unavailable { url: String },

    /// HTTP client could not be constructed
    #[error("Failed to create HTTP client: {0}")]
    Client(String),
}

/// Errors from cache-backed fetches of archive resources
#[derive(Debug, Clone, Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    /// An XML request was answered with an HTML error page
    #[error("Archive returned an error page for {url}{}", message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    SoftErrorPage {
        url: String,
        message: Option<String>,
    },
}

/// Errors raised while resolving a zoomify tile descriptor
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    /// The document has no IMAGE_PROPERTIES node
    #[error("No image properties in descriptor")]
    NoImageProperties,

    /// The document is not XML or an attribute is missing or invalid
    #[error("Malformed descriptor: {reason}")]
    Malformed { reason: String },
}

impl DescriptorError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        DescriptorError::Malformed {
            reason: reason.into(),
        }
    }
}

/// Errors that abort the assembly of a single image
#[derive(Debug, Clone, Error)]
pub enum AssembleError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Descriptor could not be turned into a tile pyramid
    #[error("Cannot resolve descriptor for {url}: {source}")]
    Descriptor {
        url: String,
        #[source]
        source: DescriptorError,
    },

    /// Compositing produced no image, or failed under the invalidate policy
    #[error("Compositing {url} failed: {diagnostic}")]
    Composite { url: String, diagnostic: String },

    /// The blocking compositor task panicked or was cancelled
    #[error("Compositor task failed: {0}")]
    Join(String),

    /// No candidate URL was given for a page
    #[error("No image URL given")]
    NoCandidates,
}

/// Errors from the receipts ledger
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Ledger at {} is not valid JSON: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from one page of a batch
#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Assemble(#[from] AssembleError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Cannot write output {}: {source}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
