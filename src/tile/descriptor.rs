//! Zoomify tile pyramid geometry.
//!
//! A zoomify image is described by an `ImageProperties.xml` document:
//!
//! ```xml
//! <IMAGE_PROPERTIES WIDTH="3000" HEIGHT="2000" NUMTILES="130" TILESIZE="256" />
//! ```
//!
//! The archive numbers tiles across all zoom levels, coarsest first, and
//! stores them in `TileGroup{n}` directories of `TILESIZE` tiles each. To
//! locate a tile of the finest level we therefore need the total number of
//! tiles in all coarser levels.
//!
//! Levels are derived by repeatedly halving (floor) the image until both
//! sides fit in one tile. Each level's tile count uses ceiling division of
//! that level's dimensions. Level 0 always holds exactly one tile.

use crate::error::DescriptorError;

/// Name of the properties node in the descriptor document.
pub const PROPERTIES_NODE: &str = "IMAGE_PROPERTIES";

/// A tile coordinate within the finest level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub x: u32,
    pub y: u32,
}

/// Resolved pyramid geometry of one zoomify image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileDescriptor {
    width: u32,
    height: u32,
    tile_size: u32,
    zoom_level: u32,
    tiles_wide: u32,
    tiles_high: u32,
    tile_count_per_level: Vec<u64>,
    tile_count_before_level: u64,
}

impl TileDescriptor {
    /// Derive the pyramid for an image of `width × height` pixels.
    pub fn from_dimensions(width: u32, height: u32, tile_size: u32) -> Result<Self, DescriptorError> {
        if width == 0 || height == 0 {
            return Err(DescriptorError::malformed(format!(
                "image dimensions must be positive, got {width}x{height}"
            )));
        }
        if tile_size == 0 {
            return Err(DescriptorError::malformed("TILESIZE must be positive"));
        }

        let mut zoom_level = 0;
        let (mut w, mut h) = (width, height);
        let mut tile_count_per_level = Vec::new();

        while w > tile_size || h > tile_size {
            zoom_level += 1;
            let level_tiles = u64::from(w.div_ceil(tile_size)) * u64::from(h.div_ceil(tile_size));
            tile_count_per_level.push(level_tiles);
            w /= 2;
            h /= 2;
        }
        tile_count_per_level.push(1);
        tile_count_per_level.reverse();

        let finer = tile_count_per_level.len() - 1;
        let tile_count_before_level = tile_count_per_level[..finer].iter().sum();

        Ok(Self {
            width,
            height,
            tile_size,
            zoom_level,
            tiles_wide: width.div_ceil(tile_size),
            tiles_high: height.div_ceil(tile_size),
            tile_count_per_level,
            tile_count_before_level,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Number of levels above the single-tile base level.
    pub fn zoom_level(&self) -> u32 {
        self.zoom_level
    }

    /// Tile columns at the finest level.
    pub fn tiles_wide(&self) -> u32 {
        self.tiles_wide
    }

    /// Tile rows at the finest level.
    pub fn tiles_high(&self) -> u32 {
        self.tiles_high
    }

    /// Tile counts per level, coarsest (always 1) first.
    pub fn tile_count_per_level(&self) -> &[u64] {
        &self.tile_count_per_level
    }

    /// Sum of tile counts of every level coarser than the finest.
    pub fn tile_count_before_level(&self) -> u64 {
        self.tile_count_before_level
    }

    /// Number of tiles at the finest level.
    pub fn tile_count(&self) -> usize {
        self.tiles_wide as usize * self.tiles_high as usize
    }

    /// Index of the `TileGroup` directory holding the tile at `(x, y)`.
    pub fn tile_group(&self, x: u32, y: u32) -> u64 {
        let index = u64::from(x)
            + u64::from(y) * u64::from(self.tiles_wide)
            + self.tile_count_before_level;
        index / u64::from(self.tile_size)
    }

    /// File name of a finest-level tile: `{zoom}-{x}-{y}.jpg`.
    pub fn tile_name(&self, x: u32, y: u32) -> String {
        format!("{}-{}-{}.jpg", self.zoom_level, x, y)
    }

    /// Path of a finest-level tile relative to the image base URL.
    pub fn tile_path(&self, x: u32, y: u32) -> String {
        format!("TileGroup{}/{}", self.tile_group(x, y), self.tile_name(x, y))
    }

    /// All finest-level tiles in row-major order.
    pub fn tiles(&self) -> impl Iterator<Item = TileCoord> + '_ {
        (0..self.tiles_high).flat_map(move |y| (0..self.tiles_wide).map(move |x| TileCoord { x, y }))
    }
}

// =============================================================================
// Descriptor Parsing
// =============================================================================

/// Parse an `ImageProperties.xml` document and derive its pyramid.
///
/// # Errors
///
/// - [`DescriptorError::NoImageProperties`] if no `IMAGE_PROPERTIES` node exists
/// - [`DescriptorError::Malformed`] if the document is not XML or `WIDTH`,
///   `HEIGHT` or `TILESIZE` is missing or invalid
pub fn resolve(xml: &str) -> Result<TileDescriptor, DescriptorError> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| DescriptorError::malformed(format!("not an XML document: {e}")))?;

    let props = doc
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == PROPERTIES_NODE)
        .ok_or(DescriptorError::NoImageProperties)?;

    let attr = |name: &'static str| {
        props
            .attribute(name)
            .map(str::trim)
            .ok_or_else(|| DescriptorError::malformed(format!("missing {name} attribute")))
    };

    let width = parse_dimension("WIDTH", attr("WIDTH")?)?;
    let height = parse_dimension("HEIGHT", attr("HEIGHT")?)?;
    let tile_size = parse_tile_size(attr("TILESIZE")?)?;

    TileDescriptor::from_dimensions(width, height, tile_size)
}

fn parse_dimension(name: &str, value: &str) -> Result<u32, DescriptorError> {
    value
        .parse::<u32>()
        .map_err(|_| DescriptorError::malformed(format!("{name} is not a pixel count: {value:?}")))
}

/// TILESIZE is written as a float by some servers but is integral in practice.
fn parse_tile_size(value: &str) -> Result<u32, DescriptorError> {
    let size: f64 = value
        .parse()
        .map_err(|_| DescriptorError::malformed(format!("TILESIZE is not a number: {value:?}")))?;

    if !size.is_finite() || size < 1.0 || size.fract() != 0.0 || size > f64::from(u32::MAX) {
        return Err(DescriptorError::malformed(format!(
            "TILESIZE must be a positive integer, got {value:?}"
        )));
    }
    Ok(size as u32)
}

// =============================================================================
// Tests
// =============================================================================
