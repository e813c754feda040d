use std::fmt;

use sha2::{Digest, Sha256};

/// Number of leading digest characters turned into nested directories.
pub const SHARD_DEPTH: usize = 3;

/// Content-cache key: the hex SHA-256 digest of an arbitrary string.
///
/// Distinct strings that denote the same resource (for example URLs whose
/// query parameters are ordered differently) produce distinct keys. No
/// normalization is applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Digest `input` into a key.
    pub fn of(input: &str) -> Self {
        let digest = Sha256::digest(input.as_bytes());
        Self(hex::encode(digest))
    }

    /// The full hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split the digest into its shard directories and the file name.
    ///
    /// `"abcdef..."` becomes `(["a", "b", "c"], "def...")`.
    pub fn shards(&self) -> ([&str; SHARD_DEPTH], &str) {
        let s = self.0.as_str();
        ([&s[0..1], &s[1..2], &s[2..3]], &s[SHARD_DEPTH..])
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
