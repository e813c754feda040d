//! Stitching fetched tiles into one raster.
//!
//! The compositor receives the on-disk cache paths of every tile in
//! row-major order and writes a single JPEG to the destination. Problems are
//! reported as diagnostics rather than errors: a missing or undecodable tile
//! leaves its cell blank and the rest of the image is still produced.

use std::path::PathBuf;

use image::codecs::jpeg::JpegEncoder;
use image::{ImageReader, Rgb, RgbImage};

/// Default JPEG quality of composites (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

/// Largest width or height the JPEG encoder accepts.
pub const MAX_JPEG_DIMENSION: u32 = u16::MAX as u32;

/// Background of cells whose tile is missing.
const BLANK: Rgb<u8> = Rgb([255, 255, 255]);

// =============================================================================
// Job and Report
// =============================================================================

/// Everything a compositor needs to stitch one image.
#[derive(Debug, Clone)]
pub struct CompositeJob {
    /// Tile files in row-major order, `tiles_wide * tiles_high` entries
    pub tiles: Vec<PathBuf>,
    pub tiles_wide: u32,
    pub tiles_high: u32,
    pub tile_size: u32,

    /// Where the composite is written
    pub destination: PathBuf,
}

/// Diagnostics collected while compositing. Empty means success.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompositeReport {
    pub diagnostics: Vec<String>,
}

impl CompositeReport {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// All diagnostics joined into one line.
    pub fn diagnostic(&self) -> String {
        self.diagnostics.join("; ")
    }

    fn push(&mut self, message: impl Into<String>) {
        self.diagnostics.push(message.into());
    }
}

/// What to do with a composite whose report is not clean.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum CompositeFailurePolicy {
    /// Log the diagnostic and keep whatever was written
    #[default]
    Keep,

    /// Delete the composite from the cache and fail the image
    Invalidate,
}

/// Stitches tiles into a single image file.
///
/// Implementations run on a blocking thread.
pub trait Compositor: Send + Sync {
    fn composite(&self, job: &CompositeJob) -> CompositeReport;
}

// =============================================================================
// JPEG Compositor
// =============================================================================

/// Compositor built on the `image` crate.
///
/// Tiles are placed at `(x * tile_size, y * tile_size)` on a white canvas of
/// `tiles_wide * tile_size` by `tiles_high * tile_size` pixels. Edge tiles
/// smaller than the tile size leave the remainder of their cell white.
#[derive(Debug, Clone)]
pub struct JpegCompositor {
    quality: u8,
}

impl JpegCompositor {
    /// Create a compositor; `quality` is clamped to 1-100.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: clamp_quality(quality),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    fn place_tiles(&self, job: &CompositeJob, canvas: &mut RgbImage, report: &mut CompositeReport) {
        let columns = job.tiles_wide.max(1) as usize;

        for (index, path) in job.tiles.iter().enumerate() {
            let x = (index % columns) as u32;
            let y = (index / columns) as u32;

            let decoded = ImageReader::open(path)
                .and_then(|reader| reader.with_guessed_format())
                .map_err(|e| e.to_string())
                .and_then(|reader| reader.decode().map_err(|e| e.to_string()));

            match decoded {
                Ok(tile) => {
                    let left = i64::from(x) * i64::from(job.tile_size);
                    let top = i64::from(y) * i64::from(job.tile_size);
                    image::imageops::replace(canvas, &tile.to_rgb8(), left, top);
                }
                Err(e) => report.push(format!("tile {x},{y} ({}): {e}", path.display())),
            }
        }
    }
}

impl Default for JpegCompositor {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl Compositor for JpegCompositor {
    fn composite(&self, job: &CompositeJob) -> CompositeReport {
        let mut report = CompositeReport::default();

        let expected = job.tiles_wide as usize * job.tiles_high as usize;
        if job.tiles.len() != expected {
            report.push(format!(
                "expected {expected} tiles for a {}x{} grid, got {}",
                job.tiles_wide,
                job.tiles_high,
                job.tiles.len()
            ));
        }

        let width = job.tiles_wide.checked_mul(job.tile_size);
        let height = job.tiles_high.checked_mul(job.tile_size);
        let (width, height) = match (width, height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
            _ => {
                report.push(format!(
                    "invalid canvas {}x{} tiles of {} px",
                    job.tiles_wide, job.tiles_high, job.tile_size
                ));
                return report;
            }
        };

        // Checked before the canvas is allocated
        if width > MAX_JPEG_DIMENSION || height > MAX_JPEG_DIMENSION {
            report.push(format!(
                "canvas {width}x{height} exceeds the JPEG limit of {MAX_JPEG_DIMENSION} px per side"
            ));
            return report;
        }

        let mut canvas = RgbImage::from_pixel(width, height, BLANK);
        self.place_tiles(job, &mut canvas, &mut report);

        let mut encoded = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut encoded, self.quality);
        if let Err(e) = encoder.encode_image(&canvas) {
            report.push(format!("encoding failed: {e}"));
            return report;
        }

        if let Err(e) = std::fs::write(&job.destination, &encoded) {
            report.push(format!("cannot write {}: {e}", job.destination.display()));
        }

        report
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Returns `true` if quality is in the valid range (1-100).
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Clamp quality to the valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}

// =============================================================================
// Tests
// =============================================================================
