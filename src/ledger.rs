//! Receipts of assembled images.
//!
//! The ledger remembers which logical image URLs were already assembled in a
//! previous run so a batch can be resumed. It is shared by every task of a
//! run; all access goes through one mutex, and each new receipt rewrites the
//! JSON file before the lock is released.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::LedgerError;

/// What was produced for one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Size of the image in bytes
    pub bytes: usize,

    /// Whether the image was reassembled from tiles
    pub tiled: bool,

    /// Tiles missing from the composite
    #[serde(default)]
    pub failed_tiles: usize,
}

/// Map from image URL to [`Receipt`], optionally persisted as JSON.
#[derive(Debug, Default)]
pub struct ReceiptLedger {
    path: Option<PathBuf>,
    receipts: Mutex<BTreeMap<String, Receipt>>,
}

impl ReceiptLedger {
    /// A ledger that lives only for this process.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the ledger at `path`. A missing file yields an empty ledger
    /// that will be created on the first [`record`](Self::record).
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let receipts = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|source| LedgerError::Json {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(LedgerError::Io { path, source }),
        };

        debug!(path = %path.display(), entries = receipts.len(), "ledger loaded");
        Ok(Self {
            path: Some(path),
            receipts: Mutex::new(receipts),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn get(&self, url: &str) -> Option<Receipt> {
        self.receipts.lock().await.get(url).cloned()
    }

    pub async fn is_recorded(&self, url: &str) -> bool {
        self.receipts.lock().await.contains_key(url)
    }

    pub async fn len(&self) -> usize {
        self.receipts.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Record a receipt and persist the ledger.
    pub async fn record(&self, url: &str, receipt: Receipt) -> Result<(), LedgerError> {
        let mut receipts = self.receipts.lock().await;
        receipts.insert(url.to_string(), receipt);

        let Some(path) = &self.path else {
            return Ok(());
        };

        let json = serde_json::to_vec_pretty(&*receipts).map_err(|source| LedgerError::Json {
            path: path.clone(),
            source,
        })?;

        // Write beside the target and rename so a crash never truncates it
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, &json)
            .await
            .map_err(|source| LedgerError::Io {
                path: staging.clone(),
                source,
            })?;
        tokio::fs::rename(&staging, path)
            .await
            .map_err(|source| LedgerError::Io {
                path: path.clone(),
                source,
            })?;

        Ok(())
    }
}
