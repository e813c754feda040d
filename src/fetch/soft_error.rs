//! Detection of HTML error pages served in place of XML.
//!
//! When the archive fails internally it still answers `200 OK`, with an HTML
//! page instead of the requested XML. The page may carry the server-side
//! trace in an element whose class is [`ERROR_TRACE_CLASS`].

use std::sync::OnceLock;

use regex::Regex;

/// Class attribute of the element holding the archive's error message.
pub const ERROR_TRACE_CLASS: &str = "dpt_error_message_trace";

/// How far into the body to look for the `<html` marker.
const PROLOGUE_LEN: usize = 1024;

/// Returns `true` when `body` is an HTML document rather than XML.
///
/// Only the document prologue is inspected, so an XML document quoting
/// HTML deeper in its content is not misclassified.
pub fn is_html_page(body: &[u8]) -> bool {
    let head = &body[..body.len().min(PROLOGUE_LEN)];
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();
    head.contains("<html")
}

/// Extract the human-readable error message from an archive error page.
pub fn extract_error_message(body: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(body);

    // Well-formed XHTML pages parse as XML
    if let Ok(doc) = roxmltree::Document::parse(&text) {
        let message = doc
            .descendants()
            .find(|n| n.attribute("class") == Some(ERROR_TRACE_CLASS))
            .map(|n| {
                n.descendants()
                    .filter(|d| d.is_text())
                    .filter_map(|d| d.text())
                    .collect::<String>()
            });
        return message.map(|m| m.trim().to_string()).filter(|m| !m.is_empty());
    }

    // Fall back to a lenient scan for tag soup
    static TRACE: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = TRACE.get_or_init(|| {
        Regex::new(&format!(
            r#"(?s)class\s*=\s*["']{}["'][^>]*>(.*?)</"#,
            regex::escape(ERROR_TRACE_CLASS)
        ))
        .ok()
    });
    let captures = pattern.as_ref()?.captures(&text)?;
    let message = captures.get(1)?.as_str().trim();
    (!message.is_empty()).then(|| message.to_string())
}
