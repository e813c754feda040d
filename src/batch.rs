//! Batch driver: assembles a list of pages one after another.
//!
//! Every page failure is logged and counted, then the batch moves on. Pages
//! already in the receipts ledger whose result is still cached are skipped.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info};

use crate::error::BatchError;
use crate::ledger::{Receipt, ReceiptLedger};
use crate::tile::{ImageAssembler, ImageResponse};

/// One page of a batch: candidate URLs of the same image, tried in order.
pub type Page = Vec<String>;

/// Parse a page list.
///
/// Blank lines and lines starting with `#` are ignored. With `alternates`
/// every whitespace-separated URL on a line is a candidate for the same
/// page; otherwise each line is a single URL.
pub fn parse_pages(text: &str, alternates: bool) -> Vec<Page> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            if alternates {
                line.split_whitespace().map(str::to_string).collect()
            } else {
                vec![line.to_string()]
            }
        })
        .collect()
}

/// Outcome counts of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Runs pages through an [`ImageAssembler`].
pub struct BatchRunner {
    assembler: Arc<ImageAssembler>,
    ledger: Option<Arc<ReceiptLedger>>,
    output_dir: Option<PathBuf>,
}

impl BatchRunner {
    pub fn new(assembler: Arc<ImageAssembler>) -> Self {
        Self {
            assembler,
            ledger: None,
            output_dir: None,
        }
    }

    /// Record receipts and skip pages already recorded.
    pub fn with_ledger(mut self, ledger: Arc<ReceiptLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Write every assembled image into `dir`.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Assemble every page. Never stops early.
    pub async fn run(&self, pages: &[Page]) -> BatchReport {
        let mut report = BatchReport::default();

        for (index, page) in pages.iter().enumerate() {
            let Some(page_url) = page.first() else {
                continue;
            };

            if self.already_done(page).await {
                info!(url = %page_url, "already assembled, skipping");
                report.skipped += 1;
                continue;
            }

            match self.run_page(index, page).await {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    error!(url = %page_url, page = index + 1, error = %e, "page failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            succeeded = report.succeeded,
            skipped = report.skipped,
            failed = report.failed,
            "batch finished"
        );
        report
    }

    /// A page is done when its receipt exists and the result of one of its
    /// candidates is still cached.
    async fn already_done(&self, page: &[String]) -> bool {
        let Some(ledger) = &self.ledger else {
            return false;
        };
        if !ledger.is_recorded(&page[0]).await {
            return false;
        }
        for url in page {
            let key = self.assembler.result_key(url);
            if self.assembler.cache().contains(&key).await {
                return true;
            }
        }
        false
    }

    async fn run_page(&self, index: usize, page: &[String]) -> Result<(), BatchError> {
        let response = self.assembler.assemble_any(page).await?;

        if let Some(dir) = &self.output_dir {
            let path = dir.join(output_name(index, &page[0]));
            write_output(&path, &response).await?;
        }

        if let Some(ledger) = &self.ledger {
            let receipt = Receipt {
                bytes: response.data.len(),
                tiled: response.tiled,
                failed_tiles: response.failed_tiles,
            };
            ledger.record(&page[0], receipt).await?;
        }

        Ok(())
    }
}

async fn write_output(path: &Path, response: &ImageResponse) -> Result<(), BatchError> {
    let output_error = |source| BatchError::Output {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(output_error)?;
    }
    tokio::fs::write(path, &response.data)
        .await
        .map_err(output_error)?;
    info!(path = %path.display(), bytes = response.data.len(), "image written");
    Ok(())
}

/// File name for page `index`: a 1-based counter and the URL's last segment.
pub fn output_name(index: usize, url: &str) -> String {
    let segment = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    let segment = segment.strip_suffix(".zip").unwrap_or(segment);

    let cleaned: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        format!("{:04}", index + 1)
    } else {
        format!("{:04}-{cleaned}", index + 1)
    }
}
