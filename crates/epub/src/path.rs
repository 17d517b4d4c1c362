//! Archive path helpers.
//!
//! Manifest and navigation hrefs are relative to the document that contains
//! them, may be percent-encoded and may carry a fragment. Zip entry names are
//! none of those things.

use percent_encoding::percent_decode_str;

/// Directory component of an archive entry name (`"OEBPS/content.opf"` →
/// `"OEBPS"`), or the empty string for entries at the archive root.
pub(crate) fn parent(path: &str) -> &str {
    path.rfind('/').map(|i| &path[..i]).unwrap_or("")
}

/// Drops any `#fragment` (and `?query`) from an href.
pub(crate) fn strip_fragment(href: &str) -> &str {
    href.split(['#', '?']).next().unwrap_or(href)
}

/// Resolves an href found in a document living in `base` into a normalized
/// archive entry name.
pub(crate) fn resolve(base: &str, href: &str) -> String {
    let decoded = percent_decode_str(strip_fragment(href)).decode_utf8_lossy();
    let mut segments: Vec<&str> = match decoded.starts_with('/') {
        true => Vec::new(),
        false => base.split('/').filter(|s| !s.is_empty()).collect(),
    };
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {},
            ".." => {
                segments.pop();
            },
            s => segments.push(s),
        }
    }
    segments.join("/")
}
