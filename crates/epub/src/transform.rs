//! Derives the "current" EPUB of a book from its master.
//!
//! A transform is a pure function of the master bytes and the [`Edits`]:
//! applying the same edits to the same master always yields the same archive.

use crate::consts;
use crate::container::Container;
use crate::error::{ErrorKind, Result};
use crate::xhtml;
use scraper::{Html, Selector};
use std::path::Path;
use tracing::instrument;

/// Edits to apply on top of a master.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Edits {
    /// Chapter identifiers (manifest hrefs) to drop.
    pub removed_chapters: Vec<String>,
    /// CSS selectors whose matching elements are removed from every chapter.
    pub content_selectors: Vec<String>,
}
impl Edits {
    pub fn is_empty(&self) -> bool {
        self.removed_chapters.is_empty() && self.content_selectors.is_empty()
    }
}

/// Reads the master at `path` and returns the serialized, edited archive.
#[instrument(skip_all, fields(
    master = %master.as_ref().display(),
    removed = edits.removed_chapters.len(),
    selectors = edits.content_selectors.len(),
))]
pub fn transform(master: impl AsRef<Path>, edits: &Edits) -> Result<Vec<u8>> {
    let mut container = Container::load(master)?;
    apply(&mut container, edits)?;
    container.to_bytes()
}

/// Applies `edits` to a container in place. Unknown chapter identifiers and
/// invalid selectors are logged and ignored.
pub fn apply(container: &mut Container, edits: &Edits) -> Result<()> {
    let removed = container.remove_documents(&edits.removed_chapters)?;
    tracing::debug!(removed, "Removed chapters");

    let selectors = compile(&edits.content_selectors);
    if selectors.is_empty() {
        return Ok(());
    }
    let mut matches = vec![0usize; selectors.len()];
    let updates = container
        .documents()
        .iter()
        .filter_map(|document| {
            strip_elements(document.markup, &selectors, &mut matches).map(|markup| (document.path.to_string(), markup))
        })
        .collect::<Vec<_>>();
    for ((source, _), count) in selectors.iter().zip(matches) {
        if count == 0 {
            tracing::debug!(selector = %source, "Selector matched nothing");
        }
    }
    for (path, markup) in updates {
        container.set_entry(&path, markup);
    }
    Ok(())
}

/// Identifiers of the chapters in which at least one of `selectors` matches.
pub fn chapters_matching(container: &Container, selectors: &[String]) -> Vec<String> {
    let selectors = compile(selectors);
    if selectors.is_empty() {
        return Vec::new();
    }
    container
        .documents()
        .iter()
        .filter(|document| {
            let html = Html::parse_document(&String::from_utf8_lossy(document.markup));
            selectors.iter().any(|(_, selector)| html.select(selector).next().is_some())
        })
        .map(|document| document.name().to_string())
        .collect()
}

pub fn parse_selector(source: &str) -> Result<Selector> {
    match Selector::parse(source) {
        Ok(selector) => Ok(selector),
        Err(_) => exn::bail!(ErrorKind::InvalidSelector(source.to_string())),
    }
}

fn compile(sources: &[String]) -> Vec<(&str, Selector)> {
    sources
        .iter()
        .filter_map(|source| match parse_selector(source) {
            Ok(selector) => Some((source.as_str(), selector)),
            Err(error) => {
                tracing::warn!(?error, "Skipping invalid selector");
                None
            },
        })
        .collect()
}

/// Removes every element matching any of `selectors` from a document.
/// Returns `None` when nothing matched, leaving the document byte-identical.
fn strip_elements(markup: &[u8], selectors: &[(&str, Selector)], matches: &mut [usize]) -> Option<Vec<u8>> {
    let text = String::from_utf8_lossy(markup);
    let prolog = consts::PROLOG_REGEX.find(&text).map_or(0, |m| m.end());
    let (prolog, body) = text.split_at(prolog);
    let mut html = Html::parse_document(body);

    let mut ids = Vec::new();
    for ((_, selector), count) in selectors.iter().zip(matches.iter_mut()) {
        let before = ids.len();
        ids.extend(html.select(selector).map(|element| element.id()));
        *count += ids.len() - before;
    }
    if ids.is_empty() {
        return None;
    }
    for id in ids {
        if let Some(mut node) = html.tree.get_mut(id) {
            node.detach();
        }
    }

    let mut output = String::with_capacity(text.len());
    output.push_str(prolog);
    output.push_str(&xhtml::serialize(&html));
    output.push('\n');
    Some(output.into_bytes())
}
