use crate::container::Container;
use scraper::Html;
use std::path::Path;
use tracing::instrument;

/// Word and chapter totals of an EPUB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub words: u64,
    pub chapters: u32,
}

/// Counts the words and chapters of the EPUB at `path`.
///
/// Never fails: an unreadable or malformed archive counts as empty, with a
/// warning.
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn count(path: impl AsRef<Path>) -> Stats {
    match Container::load(path.as_ref()) {
        Ok(container) => count_container(&container),
        Err(error) => {
            tracing::warn!(?error, "Could not read EPUB for counting; treating as empty");
            Stats::default()
        },
    }
}

pub fn count_container(container: &Container) -> Stats {
    container.documents().iter().fold(Stats::default(), |stats, document| Stats {
        words: stats.words + count_words(document.markup),
        chapters: stats.chapters + 1,
    })
}

/// Number of whitespace-delimited tokens in the text content of a document.
pub fn count_words(markup: &[u8]) -> u64 {
    let html = Html::parse_document(&String::from_utf8_lossy(markup));
    let words = html.root_element().text().collect::<String>().split_whitespace().count();
    u64::try_from(words).unwrap_or(u64::MAX)
}
