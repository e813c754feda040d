//! Test utilities for integration tests.
//!
//! This module provides a fake archive served over loopback HTTP and helpers
//! for building zoomify descriptors and JPEG tiles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use dezoom_cache::{AssemblerConfig, CompositeFailurePolicy, TiledImagePattern};

// =============================================================================
// Fake Archive
// =============================================================================

/// How the fake archive answers one path.
#[derive(Clone)]
pub enum Route {
    /// `200 OK` with a body
    Body(Bytes),

    /// `302 Found` with a raw `Location` header
    Redirect(String),

    /// Bare status code
    Status(u16),

    /// Never answers within any reasonable timeout
    Stall,
}

#[derive(Default)]
struct ArchiveState {
    routes: HashMap<String, Route>,
    hits: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
}

/// An HTTP server on `127.0.0.1` serving fixed routes and counting requests.
pub struct FakeArchive {
    base: String,
    state: Arc<ArchiveState>,
}

impl FakeArchive {
    /// Bind a loopback port and start serving `routes` (keyed by path).
    pub async fn start(routes: Vec<(String, Route)>) -> Self {
        let state = Arc::new(ArchiveState {
            routes: routes.into_iter().collect(),
            ..Default::default()
        });

        let app = Router::new()
            .fallback(serve_route)
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://{}", addr),
            state,
        }
    }

    /// `http://127.0.0.1:<port>`
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Total requests served.
    pub fn request_count(&self) -> usize {
        self.state.total.load(Ordering::SeqCst)
    }

    /// Requests served for one path.
    pub fn requests_for(&self, path: &str) -> usize {
        self.state
            .hits
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or(0)
    }
}

async fn serve_route(State(state): State<Arc<ArchiveState>>, uri: Uri) -> Response {
    let path = uri.path().to_string();
    state.total.fetch_add(1, Ordering::SeqCst);
    *state.hits.lock().unwrap().entry(path.clone()).or_default() += 1;

    match state.routes.get(&path).cloned() {
        Some(Route::Body(body)) => (StatusCode::OK, body).into_response(),
        Some(Route::Redirect(location)) => {
            (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
        }
        Some(Route::Status(code)) => StatusCode::from_u16(code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
        Some(Route::Stall) => {
            tokio::time::sleep(Duration::from_secs(30)).await;
            StatusCode::OK.into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// =============================================================================
// Zoomify Fixtures
// =============================================================================

/// Path prefix of tiled pages on the fake archive.
pub const ZOOM_PREFIX: &str = "/zoom";

/// Pattern mapping `<base>/zoom/<id>.zip` to `<base>/zoom/<id>`.
pub fn loopback_pattern() -> TiledImagePattern {
    TiledImagePattern::new(r"^(http://127\.0\.0\.1:\d+/zoom/.+)\.zip$", "{}").unwrap()
}

pub fn assembler_config(keep_tiles: bool) -> AssemblerConfig {
    AssemblerConfig {
        workers: 4,
        pattern: loopback_pattern(),
        composite_failure: CompositeFailurePolicy::Keep,
        keep_tiles,
        jpeg_quality: 90,
    }
}

/// `ImageProperties.xml` as served by the archive.
pub fn image_properties(width: u32, height: u32, tile_size: u32) -> Bytes {
    Bytes::from(format!(
        r#"<IMAGE_PROPERTIES WIDTH="{width}" HEIGHT="{height}" NUMTILES="5" NUMIMAGES="1" VERSION="1.8" TILESIZE="{tile_size}.0" />"#
    ))
}

/// A solid-color JPEG.
pub fn jpeg(width: u32, height: u32, shade: u8) -> Bytes {
    let img = RgbImage::from_pixel(width, height, Rgb([shade, shade, shade]));
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, 90)
        .encode_image(&img)
        .unwrap();
    Bytes::from(buf)
}

/// Routes for a single-zoom-level page: descriptor plus every finest tile.
///
/// Tiles at the right and bottom edges are cropped to the image bounds the
/// way the archive serves them.
pub fn zoomify_routes(page: &str, width: u32, height: u32, tile_size: u32) -> Vec<(String, Route)> {
    let root = format!("{ZOOM_PREFIX}/{page}");
    let mut routes = vec![(
        format!("{root}/ImageProperties.xml"),
        Route::Body(image_properties(width, height, tile_size)),
    )];

    let tiles_wide = width.div_ceil(tile_size);
    let tiles_high = height.div_ceil(tile_size);
    for y in 0..tiles_high {
        for x in 0..tiles_wide {
            let w = tile_size.min(width - x * tile_size);
            let h = tile_size.min(height - y * tile_size);
            routes.push((
                format!("{root}/TileGroup0/1-{x}-{y}.jpg"),
                Route::Body(jpeg(w, h, 60)),
            ));
        }
    }
    routes
}

/// Page URL that the loopback pattern recognizes as tiled.
pub fn page_url(archive: &FakeArchive, page: &str) -> String {
    archive.url(&format!("{ZOOM_PREFIX}/{page}.zip"))
}

/// Canonical zoomify URL of a page.
pub fn canonical_url(archive: &FakeArchive, page: &str) -> String {
    archive.url(&format!("{ZOOM_PREFIX}/{page}"))
}

/// Number of files below `dir`, recursively.
pub fn count_files(dir: &std::path::Path) -> usize {
    let mut count = 0;
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            count += count_files(&path);
        } else {
            count += 1;
        }
    }
    count
}
