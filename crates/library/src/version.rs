//! Masters and current copies.

use crate::error::{ErrorKind, Result};
use crate::paths::{book_key, content_hash, key_of, write_atomic, write_once};
use crate::{Library, PolicyMatcher, blocking};
use exn::{OptionExt, ResultExt};
use std::path::Path;
use time::UtcDateTime;
use tome_epub::{Container, Edits, Stats, chapters_matching, count_container, transform};
use tome_records::{Book, LogKind, NewBook, NewLog, Source, VersionState};
use tracing::instrument;

const UNKNOWN_AUTHOR: &str = "Unknown";

/// Changes to a book's edits. `None` keeps the current value; an empty list
/// clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditRequest {
    pub removed_chapters: Option<Vec<String>>,
    pub selectors: Option<Vec<String>>,
}
impl EditRequest {
    /// Undoes every edit, making current a copy of master again.
    pub fn reset() -> Self {
        Self { removed_chapters: Some(Vec::new()), selectors: Some(Vec::new()) }
    }

    pub fn is_empty(&self) -> bool {
        self.removed_chapters.is_none() && self.selectors.is_none()
    }
}

/// What ingestion needs to know about an archive before storing it.
struct Inspection {
    title: Option<String>,
    authors: Vec<String>,
    series: Option<String>,
    cover: Option<(String, Vec<u8>)>,
    stats: Stats,
}

fn inspect(bytes: &[u8]) -> Result<Inspection> {
    let container = Container::from_bytes(bytes).map_err(ErrorKind::epub)?;
    let metadata = container.metadata();
    let cover = container.cover().map(|(item, data)| {
        let extension = Path::new(&item.href)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| "img".to_string());
        (extension, data.to_vec())
    });
    Ok(Inspection {
        title: metadata.title.clone().filter(|title| !title.trim().is_empty()),
        authors: metadata.creators.clone(),
        series: metadata.series.clone(),
        cover,
        stats: count_container(&container),
    })
}

pub(crate) fn signed(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

impl Library {
    pub async fn book(&self, id: i64) -> Result<Book> {
        self.records.get_book(id).await.map_err(ErrorKind::records)?.ok_or_raise(|| ErrorKind::NotFound(id))
    }

    /// Stores a new book: master, an unedited current copy and the cover,
    /// then its record and an `added` log entry. Web-sourced books get their
    /// cleaning policy applied straight away.
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub(crate) async fn ingest(&self, bytes: Vec<u8>, source: Source, fallback_title: &str) -> Result<Book> {
        let (bytes, inspection) = blocking(move || {
            let inspection = inspect(&bytes)?;
            Ok((bytes, inspection))
        })
        .await?;

        let title = inspection.title.unwrap_or_else(|| fallback_title.to_string());
        let author =
            if inspection.authors.is_empty() { UNKNOWN_AUTHOR.to_string() } else { inspection.authors.join(", ") };
        let hash = content_hash(&bytes);
        let key = book_key(&title, source.url().unwrap_or(&hash));
        let master = self.paths.master(&key, &hash);
        let current = self.paths.current(&key);
        let cover = inspection.cover.map(|(extension, data)| (self.paths.cover(&key, &extension), data));
        if tokio::fs::try_exists(&current).await.or_raise(|| ErrorKind::Io)? {
            exn::bail!(ErrorKind::AlreadyExists(title));
        }

        let files = (master.clone(), current.clone(), cover.clone());
        blocking(move || {
            let (master, current, cover) = files;
            write_once(&master, &bytes)?;
            write_atomic(&current, &bytes)?;
            if let Some((path, data)) = cover {
                write_atomic(&path, &data)?;
            }
            Ok(())
        })
        .await?;

        let new = NewBook {
            title,
            author,
            series: inspection.series,
            source,
            master_path: master.clone(),
            current_path: current.clone(),
            cover_path: cover.map(|(path, _)| path),
            words: inspection.stats.words,
        };
        let book = match self.records.insert_book(&new).await {
            Ok(book) => book,
            Err(err) => {
                for path in [Some(&master), Some(&current), new.cover_path.as_ref()].into_iter().flatten() {
                    _ = tokio::fs::remove_file(path).await;
                }
                return Err(ErrorKind::records(err));
            },
        };
        tracing::info!(id = book.id, title = %book.title, chapters = inspection.stats.chapters, "Added book");

        let log = NewLog {
            book_id: book.id,
            kind: LogKind::Added,
            previous_chapters: None,
            new_chapters: Some(inspection.stats.chapters),
            words_added: signed(inspection.stats.words),
            timestamp: UtcDateTime::now(),
        };
        self.records.append_log(&log).await.map_err(ErrorKind::records)?;

        if book.is_web() { self.apply_policy(book).await } else { Ok(book) }
    }

    /// Deletes a book, its log and every file belonging to it.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: i64) -> Result<()> {
        let book = self.book(id).await?;
        if !self.records.delete_book(id).await.map_err(ErrorKind::records)? {
            exn::bail!(ErrorKind::NotFound(id));
        }
        for path in [Some(&book.master_path), Some(&book.current_path), book.cover_path.as_ref()].into_iter().flatten() {
            if let Err(error) = tokio::fs::remove_file(path).await {
                tracing::warn!(path = %path.display(), %error, "Could not remove file of deleted book");
            }
        }
        if let Some(masters) = book.master_path.parent() {
            _ = tokio::fs::remove_dir(masters).await;
        }
        Ok(())
    }

    /// Chapter identifiers of the book's master, in manifest order.
    pub async fn chapters(&self, id: i64) -> Result<Vec<String>> {
        let book = self.book(id).await?;
        blocking(move || {
            let container = Container::load(&book.master_path).map_err(ErrorKind::epub)?;
            Ok(container.documents().iter().map(|document| document.name().to_string()).collect())
        })
        .await
    }

    /// Changes which chapters are removed and which selectors are stripped,
    /// then derives current from master again.
    #[instrument(skip(self))]
    pub async fn edit(&self, id: i64, request: &EditRequest) -> Result<Book> {
        let book = self.book(id).await?;
        let edits = Edits {
            removed_chapters: request.removed_chapters.clone().unwrap_or_else(|| book.removed_chapters.clone()),
            content_selectors: request.selectors.clone().unwrap_or_else(|| book.selectors.clone()),
        };
        self.regenerate(&book, edits).await
    }

    /// Applies the first cleaning policy whose pattern matches the book's
    /// source URL. Its chapter selectors are resolved against the master into
    /// chapter identifiers. Books without a URL or a matching policy are
    /// returned unchanged.
    pub async fn apply_policy(&self, book: Book) -> Result<Book> {
        let Some(url) = book.source.url() else {
            return Ok(book);
        };
        let policies = self.records.list_policies().await.map_err(ErrorKind::records)?;
        let Some(policy) = PolicyMatcher::new(&policies).find(url) else {
            tracing::debug!(id = book.id, "No cleaning policy matches");
            return Ok(book);
        };
        tracing::info!(id = book.id, policy = %policy.name, "Applying cleaning policy");

        let master = book.master_path.clone();
        let selectors = policy.chapter_selectors.clone();
        let removed_chapters = blocking(move || {
            let container = Container::load(&master).map_err(ErrorKind::epub)?;
            Ok(chapters_matching(&container, &selectors))
        })
        .await?;
        let edits = Edits { removed_chapters, content_selectors: policy.content_selectors.clone() };
        self.regenerate(&book, edits).await
    }

    /// Rewrites current as `edits` applied to master and records the result.
    async fn regenerate(&self, book: &Book, edits: Edits) -> Result<Book> {
        let master = book.master_path.clone();
        let current = book.current_path.clone();
        let (edits, stats) = blocking(move || {
            let bytes = transform(&master, &edits).map_err(ErrorKind::epub)?;
            let stats = count_container(&Container::from_bytes(&bytes).map_err(ErrorKind::epub)?);
            write_atomic(&current, &bytes)?;
            Ok((edits, stats))
        })
        .await?;
        let state = VersionState {
            current_words: stats.words,
            removed_chapters: edits.removed_chapters,
            selectors: edits.content_selectors,
            ..VersionState::from(book)
        };
        self.records.update_versions(book.id, &state).await.map_err(ErrorKind::records)
    }

    /// Makes a freshly downloaded archive the book's master. Previous edits
    /// are discarded and the matching cleaning policy is applied again.
    ///
    /// The new master is removed again if the record can't be updated; the
    /// previous master is removed once the record points elsewhere.
    #[instrument(skip(self, book, bytes), fields(id = book.id))]
    pub(crate) async fn promote(&self, book: &Book, bytes: Vec<u8>) -> Result<Book> {
        let hash = content_hash(&bytes);
        let key = key_of(&book.current_path)
            .map(str::to_string)
            .unwrap_or_else(|| book_key(&book.title, book.source.url().unwrap_or(&hash)));
        let master = self.paths.master(&key, &hash);

        let target = master.clone();
        let (bytes, stats, written) = blocking(move || {
            let stats = count_container(&Container::from_bytes(&bytes).map_err(ErrorKind::epub)?);
            let written = write_once(&target, &bytes)?;
            Ok((bytes, stats, written))
        })
        .await?;

        let state = VersionState {
            master_path: master.clone(),
            current_path: book.current_path.clone(),
            master_words: stats.words,
            current_words: stats.words,
            removed_chapters: Vec::new(),
            selectors: Vec::new(),
        };
        let updated = match self.records.update_versions(book.id, &state).await {
            Ok(updated) => updated,
            Err(err) => {
                if written {
                    _ = tokio::fs::remove_file(&master).await;
                }
                return Err(ErrorKind::records(err));
            },
        };

        if book.master_path != master
            && let Err(error) = tokio::fs::remove_file(&book.master_path).await
        {
            tracing::warn!(path = %book.master_path.display(), %error, "Could not remove previous master");
        }

        let current = updated.current_path.clone();
        blocking(move || write_atomic(&current, &bytes)).await?;
        self.apply_policy(updated).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::test_library;
    use tome_epub::count;
    use tome_epub::fixture::{EpubBuilder, paragraph};
    use tome_records::NewCleaningConfig;

    fn three_chapters() -> Vec<u8> {
        EpubBuilder::new("The Teatime Cookbook").author("Winnie the Pooh").chapters(3, 100).build()
    }

    #[tokio::test]
    async fn test_ingest_upload() {
        let test = test_library().await;
        let library = &test.library;
        let book = library.ingest(three_chapters(), Source::Epub, "fallback").await.unwrap();

        assert_eq!(book.title, "The Teatime Cookbook");
        assert_eq!(book.author, "Winnie the Pooh");
        assert_eq!(book.master_words, 300);
        assert_eq!(book.current_words, 300);
        assert_eq!(std::fs::read(&book.master_path).unwrap(), std::fs::read(&book.current_path).unwrap());
        assert!(book.master_path.starts_with(library.paths().root()));

        let log = library.records().latest_log(book.id).await.unwrap().unwrap();
        assert_eq!(log.kind, LogKind::Added);
        assert_eq!(log.new_chapters, Some(3));
        assert_eq!(log.words_added, 300);
    }

    #[tokio::test]
    async fn test_ingest_fallbacks() {
        let test = test_library().await;
        let bytes = EpubBuilder::new("").chapters(1, 10).cover("Images/cover.JPG", b"jpeg".to_vec()).build();
        let book = test.library.ingest(bytes, Source::Epub, "story-file").await.unwrap();
        assert_eq!(book.title, "story-file");
        assert_eq!(book.author, "Unknown");
        let cover = book.cover_path.unwrap();
        assert_eq!(cover.extension().unwrap(), "jpg");
        assert_eq!(std::fs::read(cover).unwrap(), b"jpeg");
    }

    #[tokio::test]
    async fn test_ingest_twice() {
        let test = test_library().await;
        test.library.ingest(three_chapters(), Source::Epub, "a").await.unwrap();
        let err = test.library.ingest(three_chapters(), Source::Epub, "a").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_ingest_invalid_archive() {
        let test = test_library().await;
        let err = test.library.ingest(b"not a zip".to_vec(), Source::Epub, "a").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Format(_)));
        assert!(test.library.records().list_books().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_edit_always_starts_from_master() {
        let test = test_library().await;
        let library = &test.library;
        let book = library.ingest(three_chapters(), Source::Epub, "a").await.unwrap();
        let master = std::fs::read(&book.master_path).unwrap();

        let request = EditRequest { removed_chapters: Some(vec!["Text/ch2.xhtml".to_string()]), selectors: None };
        let edited = library.edit(book.id, &request).await.unwrap();
        assert_eq!(edited.removed_chapters, vec!["Text/ch2.xhtml"]);
        assert_eq!(edited.current_words, 200);
        assert_eq!(count(&edited.current_path).chapters, 2);

        // A second edit replaces the first rather than stacking on top of it.
        let request = EditRequest { removed_chapters: Some(vec!["Text/ch3.xhtml".to_string()]), selectors: None };
        let edited = library.edit(book.id, &request).await.unwrap();
        assert_eq!(count(&edited.current_path).chapters, 2);
        assert_eq!(library.chapters(book.id).await.unwrap().len(), 3);

        let reset = library.edit(book.id, &EditRequest::reset()).await.unwrap();
        assert!(reset.removed_chapters.is_empty());
        assert_eq!(reset.current_words, 300);
        assert_eq!(std::fs::read(&book.master_path).unwrap(), master);
    }

    #[tokio::test]
    async fn test_edit_keeps_unspecified_fields() {
        let test = test_library().await;
        let library = &test.library;
        let book = library.ingest(three_chapters(), Source::Epub, "a").await.unwrap();
        let request = EditRequest { removed_chapters: Some(vec!["Text/ch1.xhtml".to_string()]), selectors: None };
        library.edit(book.id, &request).await.unwrap();
        let request = EditRequest { removed_chapters: None, selectors: Some(vec!["p.note".to_string()]) };
        let edited = library.edit(book.id, &request).await.unwrap();
        assert_eq!(edited.removed_chapters, vec!["Text/ch1.xhtml"]);
        assert_eq!(edited.selectors, vec!["p.note"]);
    }

    #[tokio::test]
    async fn test_edit_missing_book() {
        let test = test_library().await;
        let err = test.library.edit(42, &EditRequest::reset()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(42)));
    }

    #[tokio::test]
    async fn test_web_ingest_applies_policy() {
        let test = test_library().await;
        let library = &test.library;
        library
            .records()
            .create_policy(&NewCleaningConfig {
                name: "author notes".to_string(),
                url_pattern: r"example\.com".to_string(),
                chapter_selectors: vec!["div.notes-only".to_string()],
                content_selectors: vec!["p.note".to_string()],
            })
            .await
            .unwrap();
        let bytes = EpubBuilder::new("Hundred Acre Wood")
            .chapter("Text/ch1.xhtml", "One", paragraph(100))
            .chapter("Text/ch2.xhtml", "Notes", format!("<div class=\"notes-only\">{}</div>", paragraph(20)))
            .chapter("Text/ch3.xhtml", "Two", format!("{}\n<p class=\"note\">thanks for reading</p>", paragraph(100)))
            .build();

        let book = library.ingest(bytes, Source::Web("https://example.com/s/1".to_string()), "a").await.unwrap();
        assert_eq!(book.removed_chapters, vec!["Text/ch2.xhtml"]);
        assert_eq!(book.selectors, vec!["p.note"]);
        assert_eq!(book.master_words, 223);
        assert_eq!(book.current_words, 200);
    }

    #[tokio::test]
    async fn test_first_created_policy_wins() {
        let test = test_library().await;
        for (name, selector) in [("first", "p.first"), ("second", "p.second")] {
            let policy = NewCleaningConfig {
                name: name.to_string(),
                url_pattern: "example".to_string(),
                chapter_selectors: vec![],
                content_selectors: vec![selector.to_string()],
            };
            test.library.create_policy(&policy).await.unwrap();
        }
        let book = test.library.ingest(three_chapters(), Source::Web("https://example.com/s/2".to_string()), "a");
        assert_eq!(book.await.unwrap().selectors, vec!["p.first"]);
    }

    #[tokio::test]
    async fn test_remove() {
        let test = test_library().await;
        let bytes = EpubBuilder::new("Gone").chapters(1, 10).cover("Images/cover.jpg", b"jpeg".to_vec()).build();
        let book = test.library.ingest(bytes, Source::Epub, "a").await.unwrap();
        test.library.remove(book.id).await.unwrap();
        assert!(!book.master_path.exists());
        assert!(!book.master_path.parent().unwrap().exists());
        assert!(!book.current_path.exists());
        assert!(!book.cover_path.unwrap().exists());
        assert!(test.library.records().list_logs(book.id).await.unwrap().is_empty());
        let err = test.library.remove(book.id).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }
}
