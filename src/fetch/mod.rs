//! Network layer for the archive.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │             CachedFetcher               │
//! │  (get-or-compute, soft-error pages)     │
//! └──────────┬───────────────────┬──────────┘
//!            │                   │
//!            ▼                   ▼
//! ┌────────────────────┐ ┌─────────────────────┐
//! │    ContentCache    │ │     FetchClient     │
//! │                    │ │ (retry, redirects)  │
//! └────────────────────┘ └──────────┬──────────┘
//!                                   │
//!                                   ▼
//!                        ┌─────────────────────┐
//!                        │   HttpTransport     │
//!                        │  (reqwest, mocks)   │
//!                        └─────────────────────┘
//! ```

mod archive;
mod client;
mod soft_error;
mod transport;

pub use archive::CachedFetcher;
pub use client::{
    FetchClient, FetchOptions, DEFAULT_BASE_URL, DEFAULT_MAX_REDIRECTS, DEFAULT_MAX_RETRIES,
    DEFAULT_OPEN_TIMEOUT, DEFAULT_READ_TIMEOUT,
};
pub use soft_error::{extract_error_message, is_html_page, ERROR_TRACE_CLASS};
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport};
