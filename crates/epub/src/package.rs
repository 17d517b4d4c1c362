//! OPF package document: metadata, manifest and spine.
//!
//! The package is parsed into a [`Package`] for addressing, but never
//! regenerated from it. Edits are applied by streaming the original document
//! through [`rewrite`], dropping only the elements that refer to removed items,
//! so metadata the model doesn't understand survives untouched.

use crate::consts;
use crate::error::{ErrorKind, Result};
use crate::path::strip_fragment;
use exn::{OptionExt, ResultExt};
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::collections::HashSet;

/// Descriptive metadata of a publication.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub title: Option<String>,
    pub creators: Vec<String>,
    pub language: Option<String>,
    pub identifier: Option<String>,
    /// Calibre's `calibre:series`, or an EPUB 3 `belongs-to-collection`.
    pub series: Option<String>,
    /// Manifest id referenced by an EPUB 2 `<meta name="cover">`.
    pub cover_id: Option<String>,
}

/// A single manifest entry. The `href` is relative to the package document
/// and doubles as the item's stable name (chapter identifier).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub id: String,
    pub href: String,
    pub media_type: String,
    pub properties: Option<String>,
}
impl ManifestItem {
    fn has_property(&self, property: &str) -> bool {
        self.properties.as_deref().is_some_and(|p| p.split_ascii_whitespace().any(|p| p == property))
    }

    /// The EPUB 3 navigation document.
    pub fn is_navigation(&self) -> bool {
        self.has_property("nav")
    }

    /// Chapter-like content: an (X)HTML item that isn't the navigation document.
    pub fn is_document(&self) -> bool {
        let media_type = self.media_type.trim();
        (media_type.eq_ignore_ascii_case(consts::MEDIA_TYPE_XHTML)
            || media_type.eq_ignore_ascii_case(consts::MEDIA_TYPE_HTML))
            && !self.is_navigation()
    }

    pub fn is_ncx(&self) -> bool {
        self.media_type.trim().eq_ignore_ascii_case(consts::MEDIA_TYPE_NCX)
    }

    pub fn is_cover_image(&self) -> bool {
        self.has_property("cover-image")
    }
}

/// Parsed OPF package document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Package {
    pub metadata: Metadata,
    /// Manifest items in document order.
    pub manifest: Vec<ManifestItem>,
    /// Reading order, as manifest ids.
    pub spine: Vec<String>,
    /// Manifest id of the NCX, from `<spine toc="…">`.
    pub toc_id: Option<String>,
}
impl Package {
    pub fn item(&self, id: &str) -> Option<&ManifestItem> {
        self.manifest.iter().find(|item| item.id == id)
    }

    pub fn item_by_href(&self, href: &str) -> Option<&ManifestItem> {
        self.manifest.iter().find(|item| item.href == href)
    }

    /// The EPUB 2 NCX table of contents, if any.
    pub fn ncx(&self) -> Option<&ManifestItem> {
        self.toc_id
            .as_deref()
            .and_then(|id| self.item(id))
            .or_else(|| self.manifest.iter().find(|item| item.is_ncx()))
    }

    /// The EPUB 3 navigation document, if any.
    pub fn navigation(&self) -> Option<&ManifestItem> {
        self.manifest.iter().find(|item| item.is_navigation())
    }

    /// The cover image item. The EPUB 3 property takes priority.
    pub fn cover(&self) -> Option<&ManifestItem> {
        self.manifest
            .iter()
            .find(|item| item.is_cover_image())
            .or_else(|| self.metadata.cover_id.as_deref().and_then(|id| self.item(id)))
    }
}

#[derive(Clone, Copy)]
enum Field {
    Title,
    Creator,
    Language,
    Identifier,
    Collection,
}

/// Parses `META-INF/container.xml` and returns the path of the (first)
/// package document.
pub(crate) fn parse_container(bytes: &[u8]) -> Result<String> {
    let content = utf8(bytes).ok_or_raise(|| ErrorKind::Package("container.xml is not valid UTF-8".into()))?;
    let mut reader = Reader::from_str(content);
    loop {
        let event = reader.read_event().or_raise(|| ErrorKind::Package("container.xml".into()))?;
        match event {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"rootfile" => {
                if let Some(path) = attribute(&e, b"full-path").filter(|p| !p.is_empty()) {
                    return Ok(path);
                }
            },
            Event::Eof => break,
            _ => {},
        }
    }
    exn::bail!(ErrorKind::Package("no rootfile in container.xml".into()));
}

/// Parses an OPF package document.
pub(crate) fn parse(bytes: &[u8]) -> Result<Package> {
    let content = utf8(bytes).ok_or_raise(|| ErrorKind::Package("package is not valid UTF-8".into()))?;
    let mut reader = Reader::from_str(content);
    let mut package = Package::default();
    let mut in_metadata = false;
    let mut capture: Option<Field> = None;
    let mut text = String::new();

    loop {
        let event = reader
            .read_event()
            .or_raise(|| ErrorKind::Package(format!("XML error near byte {}", reader.buffer_position())))?;
        match event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"metadata" => in_metadata = true,
                b"title" if in_metadata => capture = Some(Field::Title),
                b"creator" if in_metadata => capture = Some(Field::Creator),
                b"language" if in_metadata => capture = Some(Field::Language),
                b"identifier" if in_metadata => capture = Some(Field::Identifier),
                b"meta" if in_metadata => {
                    meta(&e, &mut package.metadata);
                    if attribute(&e, b"property").as_deref() == Some("belongs-to-collection") {
                        capture = Some(Field::Collection);
                    }
                },
                _ => element(&e, &mut package),
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"meta" if in_metadata => meta(&e, &mut package.metadata),
                _ => element(&e, &mut package),
            },
            Event::Text(e) if capture.is_some() => text.push_str(&String::from_utf8_lossy(e.as_ref())),
            Event::CData(e) if capture.is_some() => text.push_str(&String::from_utf8_lossy(e.as_ref())),
            Event::GeneralRef(e) if capture.is_some() => {
                if let Some(resolved) = resolve_entity(&String::from_utf8_lossy(e.as_ref())) {
                    text.push_str(&resolved);
                }
            },
            Event::End(e) => {
                if e.local_name().as_ref() == b"metadata" {
                    in_metadata = false;
                }
                if let Some(field) = capture.take() {
                    assign(&mut package.metadata, field, text.trim());
                    text.clear();
                }
            },
            Event::Eof => break,
            _ => {},
        }
    }
    Ok(package)
}

fn assign(metadata: &mut Metadata, field: Field, value: &str) {
    if value.is_empty() {
        return;
    }
    let value = value.to_string();
    match field {
        Field::Title => _ = metadata.title.get_or_insert(value),
        Field::Creator => metadata.creators.push(value),
        Field::Language => _ = metadata.language.get_or_insert(value),
        Field::Identifier => _ = metadata.identifier.get_or_insert(value),
        Field::Collection => _ = metadata.series.get_or_insert(value),
    }
}

fn meta(e: &BytesStart<'_>, metadata: &mut Metadata) {
    let (Some(name), Some(content)) = (attribute(e, b"name"), attribute(e, b"content")) else {
        return;
    };
    match name.as_str() {
        "cover" => _ = metadata.cover_id.get_or_insert(content),
        "calibre:series" if !content.trim().is_empty() => metadata.series = Some(content.trim().to_string()),
        _ => {},
    }
}

/// Manifest items, spine references and the spine's `toc` attribute may
/// appear as either empty or start elements.
fn element(e: &BytesStart<'_>, package: &mut Package) {
    match e.local_name().as_ref() {
        b"item" => {
            let (Some(id), Some(href)) = (attribute(e, b"id"), attribute(e, b"href")) else {
                tracing::debug!("Skipping manifest item without id or href");
                return;
            };
            package.manifest.push(ManifestItem {
                id,
                href,
                media_type: attribute(e, b"media-type").unwrap_or_default(),
                properties: attribute(e, b"properties"),
            });
        },
        b"itemref" => {
            if let Some(idref) = attribute(e, b"idref") {
                package.spine.push(idref);
            }
        },
        b"spine" => package.toc_id = attribute(e, b"toc"),
        _ => {},
    }
}

/// Streams the package document, dropping manifest items and spine references
/// for `removed_ids` and guide references pointing at `removed_hrefs`.
/// Everything else (including all metadata) is written back as-is.
pub(crate) fn rewrite(bytes: &[u8], removed_ids: &HashSet<&str>, removed_hrefs: &HashSet<&str>) -> Result<Vec<u8>> {
    let content = utf8(bytes).ok_or_raise(|| ErrorKind::Package("package is not valid UTF-8".into()))?;
    let mut reader = Reader::from_str(content);
    let mut writer = Writer::new(Vec::with_capacity(bytes.len()));
    let dropped = |e: &BytesStart<'_>| match e.local_name().as_ref() {
        b"item" => attribute(e, b"id").is_some_and(|id| removed_ids.contains(id.as_str())),
        b"itemref" => attribute(e, b"idref").is_some_and(|id| removed_ids.contains(id.as_str())),
        b"reference" => attribute(e, b"href").is_some_and(|href| removed_hrefs.contains(strip_fragment(&href))),
        _ => false,
    };
    // Depth inside a dropped start element.
    let mut skipping = 0usize;
    loop {
        let event = reader
            .read_event()
            .or_raise(|| ErrorKind::Package(format!("XML error near byte {}", reader.buffer_position())))?;
        match &event {
            Event::Eof => break,
            Event::Start(_) if skipping > 0 => skipping += 1,
            Event::End(_) if skipping > 0 => skipping -= 1,
            _ if skipping > 0 => {},
            Event::Start(e) if dropped(e) => skipping = 1,
            Event::Empty(e) if dropped(e) => {},
            _ => writer.write_event(event).or_raise(|| ErrorKind::Io)?,
        }
    }
    Ok(writer.into_inner())
}

/// Reads an attribute by its qualified name, unescaping XML entities.
pub(crate) fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    let attr = e.attributes().flatten().find(|a| a.key.as_ref() == key)?;
    let raw = String::from_utf8_lossy(&attr.value).into_owned();
    let unescaped = quick_xml::escape::unescape(&raw).map(|v| v.into_owned()).ok();
    Some(unescaped.unwrap_or(raw))
}

/// Interprets bytes as UTF-8, skipping a byte order mark.
pub(crate) fn utf8(bytes: &[u8]) -> Option<&str> {
    std::str::from_utf8(bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes)).ok()
}

/// Resolves the XML predefined and numeric character references.
pub(crate) fn resolve_entity(entity: &str) -> Option<String> {
    match entity {
        "apos" => return Some("'".to_string()),
        "quot" => return Some("\"".to_string()),
        "lt" => return Some("<".to_string()),
        "gt" => return Some(">".to_string()),
        "amp" => return Some("&".to_string()),
        _ => {},
    }
    let code = match entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => entity.strip_prefix('#')?.parse::<u32>().ok()?,
    };
    char::from_u32(code).map(String::from)
}
