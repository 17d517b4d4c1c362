//! Table of contents: EPUB 2 NCX and EPUB 3 navigation documents.
//!
//! Both dialects are handled by the same two routines, parameterized by
//! [`Dialect`]: a reader producing [`TocEntry`] trees and a streaming filter
//! dropping entries whose target was removed from the container.

use crate::error::{ErrorKind, Result};
use crate::package::{attribute, resolve_entity, utf8};
use crate::path::resolve;
use exn::{OptionExt, ResultExt};
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::ops::Range;

/// A table of contents entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub title: String,
    /// Link as written in the navigation document.
    pub href: String,
    /// Archive entry the link points at, without fragment.
    pub target: String,
    pub children: Vec<TocEntry>,
}

pub(crate) struct Dialect {
    /// Element holding the entries we care about.
    scope: &'static [u8],
    /// Elements forming a (nestable) entry.
    entries: &'static [&'static [u8]],
    /// Elements carrying an entry's label text.
    labels: &'static [&'static [u8]],
    /// Element and attribute carrying an entry's link.
    link: (&'static [u8], &'static [u8]),
    /// Whether entries carry a `playOrder` that must stay contiguous.
    ordered: bool,
}

pub(crate) const NCX: Dialect = Dialect {
    scope: b"navMap",
    entries: &[b"navPoint", b"pageTarget", b"navTarget"],
    labels: &[b"text"],
    link: (b"content", b"src"),
    ordered: true,
};

pub(crate) const NAV: Dialect = Dialect {
    scope: b"nav",
    entries: &[b"li"],
    labels: &[b"a", b"span"],
    link: (b"a", b"href"),
    ordered: false,
};

impl Dialect {
    fn is_entry(&self, name: &[u8]) -> bool {
        self.entries.iter().any(|entry| *entry == name)
    }

    fn is_label(&self, e: &BytesStart<'_>) -> bool {
        self.labels.iter().any(|label| *label == e.local_name().as_ref())
    }

    fn link(&self, e: &BytesStart<'_>) -> Option<String> {
        (e.local_name().as_ref() == self.link.0).then(|| attribute(e, self.link.1)).flatten()
    }

    fn opens_scope(&self, e: &BytesStart<'_>) -> bool {
        if e.local_name().as_ref() != self.scope {
            return false;
        }
        // Only the toc <nav>, not landmarks or page lists. A nav without any
        // type is assumed to be the table of contents.
        match attribute(e, b"epub:type") {
            Some(kind) => kind.split_ascii_whitespace().any(|k| k == "toc"),
            None => true,
        }
    }
}

fn navigation_error(reader: &Reader<&[u8]>) -> ErrorKind {
    ErrorKind::Navigation(format!("XML error near byte {}", reader.buffer_position()))
}

/// Reads the table of contents. `base` is the directory of the navigation
/// document, against which links are resolved.
pub(crate) fn parse(bytes: &[u8], base: &str, dialect: &Dialect) -> Result<Vec<TocEntry>> {
    let content = utf8(bytes).ok_or_raise(|| ErrorKind::Navigation("not valid UTF-8".into()))?;
    let mut reader = Reader::from_str(content);
    let mut roots = Vec::new();
    let mut stack: Vec<TocEntry> = Vec::new();
    let mut in_scope = false;
    // Nesting depth inside the label element being captured.
    let mut label = 0usize;

    loop {
        let event = reader.read_event().or_raise(|| navigation_error(&reader))?;
        match &event {
            Event::Start(e) if !in_scope => in_scope = dialect.opens_scope(e),
            Event::Start(e) if dialect.is_entry(e.local_name().as_ref()) => stack.push(TocEntry {
                title: String::new(),
                href: String::new(),
                target: String::new(),
                children: Vec::new(),
            }),
            Event::Start(e) | Event::Empty(e) => {
                let Some(top) = stack.last_mut() else { continue };
                if let Some(href) = dialect.link(e).filter(|_| top.href.is_empty()) {
                    top.target = resolve(base, &href);
                    top.href = href;
                }
                if label > 0 {
                    label += usize::from(matches!(event, Event::Start(_)));
                } else if matches!(event, Event::Start(_)) && top.title.is_empty() && dialect.is_label(e) {
                    label = 1;
                }
            },
            Event::Text(e) if label > 0 => {
                if let Some(top) = stack.last_mut() {
                    top.title.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            },
            Event::GeneralRef(e) if label > 0 => {
                if let (Some(top), Some(resolved)) =
                    (stack.last_mut(), resolve_entity(&String::from_utf8_lossy(e.as_ref())))
                {
                    top.title.push_str(&resolved);
                }
            },
            Event::End(e) if in_scope => {
                if label > 0 {
                    label -= 1;
                } else if dialect.is_entry(e.local_name().as_ref()) {
                    if let Some(mut entry) = stack.pop() {
                        entry.title = entry.title.split_whitespace().collect::<Vec<_>>().join(" ");
                        match stack.last_mut() {
                            Some(parent) => parent.children.push(entry),
                            None => roots.push(entry),
                        }
                    }
                } else if e.local_name().as_ref() == dialect.scope {
                    break;
                }
            },
            Event::Eof => break,
            _ => {},
        }
    }
    Ok(roots)
}

struct Frame {
    /// Index of the entry's start event in the output buffer.
    start: usize,
    target: Option<String>,
    /// Output ranges of the entries nested in this one that were kept.
    nested: Vec<Range<usize>>,
}

/// Streams a navigation document, dropping every entry whose link targets one
/// of the `removed` archive entries. Entries nested in a dropped entry take
/// its place. NCX `playOrder` values are renumbered to stay contiguous.
pub(crate) fn filter(bytes: &[u8], base: &str, removed: &HashSet<String>, dialect: &Dialect) -> Result<Vec<u8>> {
    let content = utf8(bytes).ok_or_raise(|| ErrorKind::Navigation("not valid UTF-8".into()))?;
    let mut reader = Reader::from_str(content);
    let mut output: Vec<Event<'static>> = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut dropped = 0usize;

    loop {
        let event = reader.read_event().or_raise(|| navigation_error(&reader))?;
        let closes_entry = matches!(&event, Event::End(e) if dialect.is_entry(e.local_name().as_ref()));
        if closes_entry && let Some(frame) = stack.pop() {
            if frame.target.as_ref().is_some_and(|target| removed.contains(target)) {
                // Keep only the nested entries, without the wrapping label,
                // link or list elements.
                let tail = output.split_off(frame.start);
                output.extend(
                    tail.into_iter()
                        .enumerate()
                        .filter(|(i, _)| frame.nested.iter().any(|range| range.contains(&(frame.start + i))))
                        .map(|(_, event)| event),
                );
                dropped += 1;
            } else {
                output.push(event.into_owned());
            }
            if let Some(parent) = stack.last_mut()
                && output.len() > frame.start
            {
                parent.nested.push(frame.start..output.len());
            }
            continue;
        }
        match &event {
            Event::Eof => break,
            Event::Start(e) if dialect.is_entry(e.local_name().as_ref()) => {
                stack.push(Frame { start: output.len(), target: None, nested: Vec::new() });
            },
            Event::Start(e) | Event::Empty(e) => {
                if let (Some(top), Some(href)) = (stack.last_mut(), dialect.link(e)) {
                    top.target.get_or_insert_with(|| resolve(base, &href));
                }
            },
            _ => {},
        }
        output.push(event.into_owned());
    }

    if dialect.ordered && dropped > 0 {
        renumber(&mut output);
    }
    let mut writer = Writer::new(Vec::with_capacity(bytes.len()));
    for event in output {
        writer.write_event(event).or_raise(|| ErrorKind::Io)?;
    }
    Ok(writer.into_inner())
}

/// Maps the remaining distinct `playOrder` values onto `1..=n`, preserving
/// their relative order. Entries sharing a value keep sharing it.
fn renumber(events: &mut [Event<'static>]) {
    let play_order = |e: &BytesStart<'_>| attribute(e, b"playOrder").and_then(|v| v.trim().parse::<u64>().ok());
    let kept = events
        .iter()
        .filter_map(|event| match event {
            Event::Start(e) | Event::Empty(e) => play_order(e),
            _ => None,
        })
        .collect::<BTreeSet<_>>();
    let mapping = kept.into_iter().enumerate().map(|(i, old)| (old, (i + 1).to_string())).collect::<HashMap<_, _>>();

    for event in events.iter_mut() {
        let (Event::Start(e) | Event::Empty(e)) = event else { continue };
        let Some(new) = play_order(e).and_then(|old| mapping.get(&old)) else { continue };
        let mut rebuilt = BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
        for attr in e.attributes().flatten() {
            match attr.key.as_ref() {
                b"playOrder" => rebuilt.push_attribute((b"playOrder".as_slice(), new.as_bytes())),
                _ => rebuilt.push_attribute(attr),
            }
        }
        *e = rebuilt;
    }
}
