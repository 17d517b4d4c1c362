//! Adding books and checking web-sourced books for new chapters.

use crate::error::{ErrorKind, Result};
use crate::version::signed;
use crate::{Library, blocking};
use exn::{OptionExt, ResultExt};
use std::path::Path;
use time::UtcDateTime;
use tome_epub::count;
use tome_records::{Book, BookLog, LogKind, NewLog, Source};
use tracing::instrument;

/// An archive taken out of the download directory.
struct Fetched {
    bytes: Vec<u8>,
    name: String,
}

fn file_stem(path: &Path) -> String {
    path.file_stem().map(|stem| stem.to_string_lossy().into_owned()).unwrap_or_default()
}

impl Library {
    /// Runs the download tool and takes the archive it produced. The lock is
    /// held until the archive has been moved out of the download directory,
    /// so concurrent downloads can't be mistaken for each other.
    async fn download(&self, url: &str) -> Result<Fetched> {
        let _guard = self.download.lock().await;
        let incoming = self.paths.incoming();
        let path = tome_fetch::fetch_archive(&*self.fetcher, url, &incoming).await.map_err(ErrorKind::fetch)?;
        let bytes = tokio::fs::read(&path).await.or_raise(|| ErrorKind::Io)?;
        tokio::fs::remove_file(&path).await.or_raise(|| ErrorKind::Io)?;
        Ok(Fetched { bytes, name: file_stem(&path) })
    }

    /// Downloads a story that isn't in the library yet.
    #[instrument(skip(self))]
    pub async fn add_web(&self, url: &str) -> Result<Book> {
        if self.records.get_book_by_source_url(url).await.map_err(ErrorKind::records)?.is_some() {
            exn::bail!(ErrorKind::AlreadyExists(url.to_string()));
        }
        let fetched = self.download(url).await?;
        self.ingest(fetched.bytes, Source::Web(url.to_string()), &fetched.name).await
    }

    /// Adds a local EPUB. Uploaded books are never refreshed.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn upload(&self, path: &Path) -> Result<Book> {
        let bytes = tokio::fs::read(path).await.or_raise(|| ErrorKind::Io)?;
        self.ingest(bytes, Source::Epub, &file_stem(path)).await
    }

    /// Refreshes a single book, propagating any failure.
    pub async fn refresh(&self, id: i64) -> Result<BookLog> {
        let book = self.book(id).await?;
        if !book.is_web() {
            exn::bail!(ErrorKind::NotWebSourced(id));
        }
        self.refresh_one(&book).await
    }

    /// Downloads the book again and records whether it grew.
    ///
    /// Growth means *more chapters*. A re-download with the same number of
    /// chapters still replaces the master, but is logged as `checked` even if
    /// the text changed. A failed download leaves the book untouched.
    #[instrument(skip(self, book), fields(id = book.id, title = %book.title))]
    pub async fn refresh_one(&self, book: &Book) -> Result<BookLog> {
        let url = book.source.url().ok_or_raise(|| ErrorKind::NotWebSourced(book.id))?;
        let current = book.current_path.clone();
        let before = blocking(move || Ok(count(&current))).await?;

        let fetched = self.download(url).await?;
        let updated = self.promote(book, fetched.bytes).await?;

        let current = updated.current_path.clone();
        let after = blocking(move || Ok(count(&current))).await?;

        let (kind, words_added) = if after.chapters > before.chapters {
            (LogKind::Updated, signed(after.words).saturating_sub(signed(before.words)))
        } else {
            if updated.master_path != book.master_path {
                tracing::info!(chapters = after.chapters, "Content changed without new chapters; recording as checked");
            }
            (LogKind::Checked, 0)
        };
        let log = NewLog {
            book_id: book.id,
            kind,
            previous_chapters: Some(before.chapters),
            new_chapters: Some(after.chapters),
            words_added,
            timestamp: UtcDateTime::now(),
        };
        let log = self.records.append_log(&log).await.map_err(ErrorKind::records)?;
        tracing::info!(kind = %log.kind, previous = before.chapters, new = after.chapters, words_added, "Refreshed book");
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EditRequest;
    use crate::tests::test_library;
    use tome_epub::fixture::{EpubBuilder, paragraph};
    use tome_fetch::MockResponse;
    use tome_records::NewCleaningConfig;

    const URL: &str = "https://example.com/s/1";

    fn story(chapters: usize) -> Vec<u8> {
        EpubBuilder::new("Hundred Acre Wood").author("A. A. Milne").chapters(chapters, 100).build()
    }

    #[tokio::test]
    async fn test_add_web() {
        let test = test_library().await;
        test.fetcher.respond(URL, MockResponse::Archive(story(3))).await;
        let book = test.library.add_web(URL).await.unwrap();
        assert_eq!(book.source, Source::Web(URL.to_string()));
        assert_eq!(book.master_words, 300);
        // The download directory is left empty.
        let incoming = test.library.paths().incoming();
        assert_eq!(std::fs::read_dir(incoming).unwrap().count(), 0);

        let err = test.library.add_web(URL).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
        assert_eq!(test.fetcher.calls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_upload() {
        let test = test_library().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pooh.epub");
        EpubBuilder::new("Pooh").chapters(2, 50).write_to(&path);
        let book = test.library.upload(&path).await.unwrap();
        assert_eq!(book.source, Source::Epub);
        assert_eq!(book.master_words, 100);

        let err = test.library.refresh(book.id).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotWebSourced(_)));
        assert!(test.fetcher.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_with_new_chapters() {
        let test = test_library().await;
        test.fetcher.respond(URL, MockResponse::Archive(story(3))).await;
        test.fetcher.respond(URL, MockResponse::Archive(story(5))).await;
        let book = test.library.add_web(URL).await.unwrap();
        let old_master = book.master_path.clone();

        let log = test.library.refresh(book.id).await.unwrap();
        assert_eq!(log.kind, LogKind::Updated);
        assert_eq!(log.previous_chapters, Some(3));
        assert_eq!(log.new_chapters, Some(5));
        assert_eq!(log.words_added, 200);

        let book = test.library.book(book.id).await.unwrap();
        assert_eq!(book.master_words, 500);
        assert_ne!(book.master_path, old_master);
        assert!(!old_master.exists());
        assert_eq!(test.library.records().latest_log(book.id).await.unwrap().unwrap(), log);
    }

    #[tokio::test]
    async fn test_refresh_without_new_chapters() {
        let test = test_library().await;
        let changed = EpubBuilder::new("Hundred Acre Wood").author("A. A. Milne").chapters(3, 120).build();
        test.fetcher.respond(URL, MockResponse::Archive(story(3))).await;
        test.fetcher.respond(URL, MockResponse::Archive(changed)).await;
        let book = test.library.add_web(URL).await.unwrap();

        let log = test.library.refresh(book.id).await.unwrap();
        assert_eq!(log.kind, LogKind::Checked);
        assert_eq!(log.words_added, 0);
        assert_eq!(log.new_chapters, Some(3));
        // The changed text still becomes the new master.
        assert_eq!(test.library.book(book.id).await.unwrap().master_words, 360);
    }

    #[tokio::test]
    async fn test_refresh_resets_edits_and_reapplies_policy() {
        let test = test_library().await;
        let library = &test.library;
        library
            .records()
            .create_policy(&NewCleaningConfig {
                name: "notes".to_string(),
                url_pattern: "example".to_string(),
                chapter_selectors: vec!["div.notes-only".to_string()],
                content_selectors: vec![],
            })
            .await
            .unwrap();
        let notes = format!("<div class=\"notes-only\">{}</div>", paragraph(10));
        let first = EpubBuilder::new("Wood").chapters(2, 100).chapter("Text/notes1.xhtml", "Notes", &notes).build();
        let second = EpubBuilder::new("Wood")
            .chapters(3, 100)
            .chapter("Text/notes1.xhtml", "Notes", &notes)
            .chapter("Text/notes2.xhtml", "More notes", &notes)
            .build();
        test.fetcher.respond(URL, MockResponse::Archive(first)).await;
        test.fetcher.respond(URL, MockResponse::Archive(second)).await;

        let book = library.add_web(URL).await.unwrap();
        assert_eq!(book.removed_chapters, vec!["Text/notes1.xhtml"]);
        let request = EditRequest { removed_chapters: None, selectors: Some(vec!["p".to_string()]) };
        library.edit(book.id, &request).await.unwrap();

        let log = library.refresh(book.id).await.unwrap();
        assert_eq!((log.previous_chapters, log.new_chapters), (Some(2), Some(3)));
        let book = library.book(book.id).await.unwrap();
        assert_eq!(book.removed_chapters, vec!["Text/notes1.xhtml", "Text/notes2.xhtml"]);
        assert!(book.selectors.is_empty());
        assert_eq!(book.current_words, 300);
    }

    #[tokio::test]
    async fn test_failed_download_leaves_book_untouched() {
        let test = test_library().await;
        test.fetcher.respond(URL, MockResponse::Archive(story(3))).await;
        test.fetcher.respond(URL, MockResponse::Exit(1)).await;
        test.fetcher.respond(URL, MockResponse::Exit(0)).await;
        test.fetcher.respond(URL, MockResponse::Archive(b"not an epub".to_vec())).await;
        let book = test.library.add_web(URL).await.unwrap();
        let master = std::fs::read(&book.master_path).unwrap();

        let err = test.library.refresh(book.id).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Fetch(_)));
        let err = test.library.refresh(book.id).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Fetch(tome_fetch::error::ErrorKind::NoArchive)));
        let err = test.library.refresh(book.id).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Format(_)));

        assert_eq!(test.library.book(book.id).await.unwrap(), book);
        assert_eq!(std::fs::read(&book.master_path).unwrap(), master);
        let logs = test.library.records().list_logs(book.id).await.unwrap();
        assert_eq!(logs.len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_missing_book() {
        let test = test_library().await;
        let err = test.library.refresh(7).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(7)));
    }
}
