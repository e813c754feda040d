use std::sync::OnceLock;

use regex::Regex;

/// Regex recognizing tiled page URLs in archive manifests.
pub const DEFAULT_TILED_PATTERN: &str = r"MCRDFGServlet/[^/]+/(.+)\.zip$";

/// Template of the canonical zoomify base URL; `{}` receives the captured id.
pub const DEFAULT_ZOOMIFY_TEMPLATE: &str =
    "http://www.bach-digital.de/servlets/MCRZipFileNodeServlet/{}";

/// Descriptor document name under a zoomify base URL.
pub const DESCRIPTOR_NAME: &str = "ImageProperties.xml";

/// Recognizes tiled-image URLs and rewrites them to their zoomify base URL.
///
/// URLs that do not match are single-resource images and bypass tiling.
#[derive(Debug, Clone)]
pub struct TiledImagePattern {
    /// `None` only if the built-in pattern failed to compile; nothing matches
    pattern: Option<Regex>,
    template: String,
}

impl TiledImagePattern {
    /// Build a pattern. The regex must have at least one capture group and
    /// the template must contain `{}`.
    pub fn new(pattern: &str, template: impl Into<String>) -> Result<Self, String> {
        let pattern = Regex::new(pattern).map_err(|e| format!("invalid tiled pattern: {e}"))?;
        if pattern.captures_len() < 2 {
            return Err("tiled pattern needs a capture group".to_string());
        }
        let template = template.into();
        if !template.contains("{}") {
            return Err("zoomify template must contain {}".to_string());
        }
        Ok(Self {
            pattern: Some(pattern),
            template,
        })
    }

    /// Canonical zoomify base URL for `url`, or `None` if it is not tiled.
    pub fn canonicalize(&self, url: &str) -> Option<String> {
        let captures = self.pattern.as_ref()?.captures(url)?;
        let id = captures.get(1)?.as_str();
        Some(self.template.replacen("{}", id, 1))
    }

    /// URL of the descriptor document for a canonical base URL.
    pub fn descriptor_url(base: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), DESCRIPTOR_NAME)
    }

    /// URL of a tile given its path relative to the base.
    pub fn tile_url(base: &str, tile_path: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), tile_path)
    }
}

impl Default for TiledImagePattern {
    fn default() -> Self {
        Self {
            pattern: default_regex(),
            template: DEFAULT_ZOOMIFY_TEMPLATE.to_string(),
        }
    }
}

fn default_regex() -> Option<Regex> {
    static DEFAULT: OnceLock<Option<Regex>> = OnceLock::new();
    DEFAULT
        .get_or_init(|| Regex::new(DEFAULT_TILED_PATTERN).ok())
        .clone()
}
