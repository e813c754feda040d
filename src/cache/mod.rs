//! Content-addressed response cache.
//!
//! Every network response the pipeline sees is memoized here, keyed by a
//! digest of the request URL, so repeated runs are cheap and resumable.
//!
//! - [`CacheKey`]: SHA-256 digest of an arbitrary string
//! - [`ContentCache`]: sharded directory tree with get-or-compute semantics

mod key;
mod store;

pub use key::{CacheKey, SHARD_DEPTH};
pub use store::ContentCache;
