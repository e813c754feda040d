//! Tiled image layer.
//!
//! This module turns a zoomify page URL into a single image:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            ImageAssembler               │
//! └──────┬──────────────┬───────────────┬───┘
//!        │              │               │
//!        ▼              ▼               ▼
//! ┌─────────────┐ ┌─────────────┐ ┌─────────────┐
//! │ Tiled URL   │ │    Tile     │ │ Compositor  │
//! │  pattern    │ │ descriptor  │ │  (image)    │
//! └─────────────┘ └─────────────┘ └─────────────┘
//! ```
//!
//! # Components
//!
//! - [`ImageAssembler`]: fetches an image, fanning tile downloads out over a worker pool
//! - [`TiledImagePattern`]: recognizes tiled URLs and maps them to their zoomify base
//! - [`TileDescriptor`]: pyramid geometry and tile-group numbering from `ImageProperties.xml`
//! - [`JpegCompositor`]: stitches tile files into one JPEG
//!
//! # Example
//!
//! ```
//! use dezoom_cache::tile::TileDescriptor;
//!
//! let descriptor = TileDescriptor::from_dimensions(512, 512, 256).unwrap();
//! assert_eq!(descriptor.zoom_level(), 1);
//! assert_eq!(descriptor.tile_path(1, 1), "TileGroup0/1-1-1.jpg");
//! ```

mod assembler;
mod compositor;
mod descriptor;
mod pattern;

pub use assembler::{AssemblerConfig, ImageAssembler, ImageResponse};
pub use compositor::{
    clamp_quality, is_valid_quality, CompositeFailurePolicy, CompositeJob, CompositeReport,
    Compositor, JpegCompositor, DEFAULT_JPEG_QUALITY, MAX_JPEG_DIMENSION, MAX_JPEG_QUALITY,
    MIN_JPEG_QUALITY,
};
pub use descriptor::{resolve, TileCoord, TileDescriptor, PROPERTIES_NODE};
pub use pattern::{
    TiledImagePattern, DEFAULT_TILED_PATTERN, DEFAULT_ZOOMIFY_TEMPLATE, DESCRIPTOR_NAME,
};
