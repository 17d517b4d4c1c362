//! Repository for every record type of the library.
//!
//! Queries live in `queries/*.sql`. Each method runs a single statement, so
//! every write (a log append, a task increment) is committed as soon as the
//! method returns.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{
    Book, BookLog, BookLogRow, BookPatch, BookRow, CleaningConfig, CleaningConfigPatch, CleaningConfigRow, NewBook,
    NewCleaningConfig, NewLog, SourceKind, UpdateTask, UpdateTaskRow, VersionState, from_count, path_to_str, to_json,
};
use exn::{OptionExt, ResultExt};
use sqlx::SqlitePool;
use time::UtcDateTime;
use tracing::instrument;

/// Maps unique constraint violations to `conflict`, everything else to
/// [`ErrorKind::Database`].
fn classify<T>(result: sqlx::Result<T>, conflict: ErrorKind) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(e) if e.as_database_error().is_some_and(|e| e.is_unique_violation()) => Err(e).or_raise(|| conflict),
        Err(e) => Err(e).or_raise(|| ErrorKind::Database),
    }
}

/// Escapes `LIKE` wildcards so user input is matched literally.
fn like_literal(query: &str) -> String {
    query.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // Books
    // =========================================================================

    /// Returns [`ErrorKind::Conflict`] if a book with the same source URL (or
    /// the same current path) already exists.
    #[instrument(skip_all, fields(title = %book.title))]
    pub async fn insert_book(&self, book: &NewBook) -> Result<Book> {
        let now = UtcDateTime::now().unix_timestamp();
        let words = from_count(book.words, "words")?;
        let cover_path = book.cover_path.as_deref().map(|p| path_to_str(p, "cover path")).transpose()?;
        let empty = to_json(&[], "removed chapters")?;
        let row: BookRow = classify(
            sqlx::query_as(include_str!("../queries/insert_book.sql"))
                .bind(&book.title)
                .bind(&book.author)
                .bind(&book.series)
                .bind(book.source.kind().to_string())
                .bind(book.source.url())
                .bind(path_to_str(&book.master_path, "master path")?)
                .bind(path_to_str(&book.current_path, "current path")?)
                .bind(cover_path)
                .bind(words)
                .bind(words)
                .bind(&empty)
                .bind(&empty)
                .bind(now)
                .bind(now)
                .fetch_one(&self.pool)
                .await,
            ErrorKind::Conflict,
        )?;
        row.try_into()
    }

    pub async fn get_book(&self, id: i64) -> Result<Option<Book>> {
        let row: Option<BookRow> = sqlx::query_as(include_str!("../queries/get_book.sql"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Book::try_from).transpose()
    }

    pub async fn get_book_by_source_url(&self, url: impl AsRef<str>) -> Result<Option<Book>> {
        let row: Option<BookRow> = sqlx::query_as(include_str!("../queries/get_book_by_source_url.sql"))
            .bind(url.as_ref())
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Book::try_from).transpose()
    }

    pub async fn list_books(&self) -> Result<Vec<Book>> {
        let rows: Vec<BookRow> = sqlx::query_as(include_str!("../queries/list_books.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(Book::try_from).collect()
    }

    pub async fn list_books_by_source(&self, kind: SourceKind) -> Result<Vec<Book>> {
        let rows: Vec<BookRow> = sqlx::query_as(include_str!("../queries/list_books_by_source.sql"))
            .bind(kind.to_string())
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(Book::try_from).collect()
    }

    /// Case-insensitive substring search on the author.
    pub async fn search_by_author(&self, query: impl AsRef<str>) -> Result<Vec<Book>> {
        let rows: Vec<BookRow> = sqlx::query_as(include_str!("../queries/search_by_author.sql"))
            .bind(like_literal(query.as_ref()))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(Book::try_from).collect()
    }

    /// Case-insensitive substring search on the series.
    pub async fn search_by_series(&self, query: impl AsRef<str>) -> Result<Vec<Book>> {
        let rows: Vec<BookRow> = sqlx::query_as(include_str!("../queries/search_by_series.sql"))
            .bind(like_literal(query.as_ref()))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(Book::try_from).collect()
    }

    /// Applies the fields present in `patch`.
    #[instrument(skip(self, patch))]
    pub async fn update_book(&self, id: i64, patch: &BookPatch) -> Result<Book> {
        let cover_path = patch.cover_path.as_deref().map(|p| path_to_str(p, "cover path")).transpose()?;
        let row: Option<BookRow> = sqlx::query_as(include_str!("../queries/update_book.sql"))
            .bind(&patch.title)
            .bind(&patch.author)
            .bind(&patch.series)
            .bind(cover_path)
            .bind(UtcDateTime::now().unix_timestamp())
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.ok_or_raise(|| ErrorKind::NotFound("book", id))?.try_into()
    }

    /// Records a regenerated master/current pair and the edits that produced
    /// the current archive.
    #[instrument(skip(self, state))]
    pub async fn update_versions(&self, id: i64, state: &VersionState) -> Result<Book> {
        let row: Option<BookRow> = classify(
            sqlx::query_as(include_str!("../queries/update_versions.sql"))
                .bind(path_to_str(&state.master_path, "master path")?)
                .bind(path_to_str(&state.current_path, "current path")?)
                .bind(from_count(state.master_words, "master words")?)
                .bind(from_count(state.current_words, "current words")?)
                .bind(to_json(&state.removed_chapters, "removed chapters")?)
                .bind(to_json(&state.selectors, "selectors")?)
                .bind(UtcDateTime::now().unix_timestamp())
                .bind(id)
                .fetch_optional(&self.pool)
                .await,
            ErrorKind::Conflict,
        )?;
        row.ok_or_raise(|| ErrorKind::NotFound("book", id))?.try_into()
    }

    /// Deletes a book and (by cascade) its audit trail. Returns `false` if
    /// there was no such book.
    pub async fn delete_book(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/delete_book.sql"))
            .bind(id)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Book logs
    // =========================================================================

    #[instrument(skip_all, fields(book_id = log.book_id, kind = %log.kind))]
    pub async fn append_log(&self, log: &NewLog) -> Result<BookLog> {
        let row: BookLogRow = sqlx::query_as(include_str!("../queries/append_log.sql"))
            .bind(log.book_id)
            .bind(log.kind.to_string())
            .bind(log.previous_chapters.map(i64::from))
            .bind(log.new_chapters.map(i64::from))
            .bind(log.words_added)
            .bind(log.timestamp.unix_timestamp())
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.try_into()
    }

    /// The most recent entry of a book's audit trail. Entries with the same
    /// timestamp are ordered by insertion.
    pub async fn latest_log(&self, book_id: i64) -> Result<Option<BookLog>> {
        let row: Option<BookLogRow> = sqlx::query_as(include_str!("../queries/latest_log.sql"))
            .bind(book_id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(BookLog::try_from).transpose()
    }

    /// A book's audit trail, newest first.
    pub async fn list_logs(&self, book_id: i64) -> Result<Vec<BookLog>> {
        let rows: Vec<BookLogRow> = sqlx::query_as(include_str!("../queries/list_logs.sql"))
            .bind(book_id)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(BookLog::try_from).collect()
    }

    // =========================================================================
    // Update tasks
    // =========================================================================

    pub async fn running_task(&self) -> Result<Option<UpdateTask>> {
        let row: Option<UpdateTaskRow> = sqlx::query_as(include_str!("../queries/running_task.sql"))
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(UpdateTask::try_from).transpose()
    }

    /// The most recently started task, running or not.
    pub async fn latest_task(&self) -> Result<Option<UpdateTask>> {
        let row: Option<UpdateTaskRow> = sqlx::query_as(include_str!("../queries/latest_task.sql"))
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(UpdateTask::try_from).transpose()
    }

    /// Starts a new task. Returns [`ErrorKind::TaskAlreadyRunning`] if another
    /// task has not completed yet.
    #[instrument(skip(self))]
    pub async fn create_task(&self, total_books: u32, started_at: UtcDateTime) -> Result<UpdateTask> {
        let row: UpdateTaskRow = classify(
            sqlx::query_as(include_str!("../queries/create_task.sql"))
                .bind(i64::from(total_books))
                .bind(started_at.unix_timestamp())
                .fetch_one(&self.pool)
                .await,
            ErrorKind::TaskAlreadyRunning,
        )?;
        row.try_into()
    }

    /// Counts one more book as processed. Returns `false` (and changes
    /// nothing) if the task is not running or already complete.
    pub async fn increment_task(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/increment_task.sql"))
            .bind(id)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    pub async fn complete_task(&self, id: i64) -> Result<UpdateTask> {
        let row: Option<UpdateTaskRow> = sqlx::query_as(include_str!("../queries/complete_task.sql"))
            .bind(UtcDateTime::now().unix_timestamp())
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.ok_or_raise(|| ErrorKind::NotFound("update task", id))?.try_into()
    }

    // =========================================================================
    // Cleaning policies
    // =========================================================================

    /// Returns [`ErrorKind::Conflict`] if the name is already taken.
    #[instrument(skip_all, fields(name = %policy.name))]
    pub async fn create_policy(&self, policy: &NewCleaningConfig) -> Result<CleaningConfig> {
        let row: CleaningConfigRow = classify(
            sqlx::query_as(include_str!("../queries/create_policy.sql"))
                .bind(&policy.name)
                .bind(&policy.url_pattern)
                .bind(to_json(&policy.chapter_selectors, "chapter selectors")?)
                .bind(to_json(&policy.content_selectors, "content selectors")?)
                .bind(UtcDateTime::now().unix_timestamp())
                .fetch_one(&self.pool)
                .await,
            ErrorKind::Conflict,
        )?;
        row.try_into()
    }

    pub async fn get_policy(&self, id: i64) -> Result<Option<CleaningConfig>> {
        let row: Option<CleaningConfigRow> = sqlx::query_as(include_str!("../queries/get_policy.sql"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(CleaningConfig::try_from).transpose()
    }

    /// All policies, in creation order.
    pub async fn list_policies(&self) -> Result<Vec<CleaningConfig>> {
        let rows: Vec<CleaningConfigRow> = sqlx::query_as(include_str!("../queries/list_policies.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(CleaningConfig::try_from).collect()
    }

    #[instrument(skip(self, patch))]
    pub async fn update_policy(&self, id: i64, patch: &CleaningConfigPatch) -> Result<CleaningConfig> {
        let chapter_selectors =
            patch.chapter_selectors.as_deref().map(|s| to_json(s, "chapter selectors")).transpose()?;
        let content_selectors =
            patch.content_selectors.as_deref().map(|s| to_json(s, "content selectors")).transpose()?;
        let row: Option<CleaningConfigRow> = classify(
            sqlx::query_as(include_str!("../queries/update_policy.sql"))
                .bind(&patch.name)
                .bind(&patch.url_pattern)
                .bind(chapter_selectors)
                .bind(content_selectors)
                .bind(id)
                .fetch_optional(&self.pool)
                .await,
            ErrorKind::Conflict,
        )?;
        row.ok_or_raise(|| ErrorKind::NotFound("cleaning config", id))?.try_into()
    }

    pub async fn delete_policy(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/delete_policy.sql"))
            .bind(id)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LogKind, Source, TaskStatus};
    use rstest::rstest;
    use std::path::PathBuf;
    use time::Duration;

    async fn repo() -> Repository {
        let db = Database::connect_in_memory().await.unwrap();
        Repository::from(&db)
    }

    fn new_book(title: &str, author: &str, source: Source) -> NewBook {
        NewBook {
            title: title.to_string(),
            author: author.to_string(),
            series: None,
            source,
            master_path: PathBuf::from(format!("masters/{title}/0001.epub")),
            current_path: PathBuf::from(format!("current/{title}.epub")),
            cover_path: None,
            words: 1000,
        }
    }

    fn web(url: &str) -> Source {
        Source::Web(url.to_string())
    }

    #[tokio::test]
    async fn test_insert_and_get_book() {
        let repo = repo().await;
        let inserted = repo.insert_book(&new_book("teatime", "Winnie", web("https://example.com/1"))).await.unwrap();
        assert_eq!(inserted.master_words, 1000);
        assert_eq!(inserted.current_words, 1000);
        assert!(inserted.removed_chapters.is_empty());

        assert_eq!(repo.get_book(inserted.id).await.unwrap(), Some(inserted.clone()));
        assert_eq!(repo.get_book_by_source_url("https://example.com/1").await.unwrap(), Some(inserted));
        assert_eq!(repo.get_book(9999).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_source_url() {
        let repo = repo().await;
        repo.insert_book(&new_book("one", "A", web("https://example.com/1"))).await.unwrap();
        let err = repo.insert_book(&new_book("two", "B", web("https://example.com/1"))).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Conflict));
    }

    #[tokio::test]
    async fn test_list_books_by_source() {
        let repo = repo().await;
        repo.insert_book(&new_book("one", "A", web("https://example.com/1"))).await.unwrap();
        repo.insert_book(&new_book("two", "B", Source::Epub)).await.unwrap();
        repo.insert_book(&new_book("three", "C", web("https://example.com/3"))).await.unwrap();

        let web = repo.list_books_by_source(SourceKind::Web).await.unwrap();
        assert_eq!(web.iter().map(|b| b.title.as_str()).collect::<Vec<_>>(), vec!["one", "three"]);
        assert_eq!(repo.list_books_by_source(SourceKind::Epub).await.unwrap().len(), 1);
        assert_eq!(repo.list_books().await.unwrap().len(), 3);
    }

    #[rstest]
    #[case("milne", 1)]
    #[case("MILNE", 1)]
    #[case("a. a.", 1)]
    #[case("%", 0)]
    #[case("nobody", 0)]
    #[tokio::test]
    async fn test_search_by_author(#[case] query: &str, #[case] expected: usize) {
        let repo = repo().await;
        repo.insert_book(&new_book("pooh", "A. A. Milne", Source::Epub)).await.unwrap();
        repo.insert_book(&new_book("hobbit", "J. R. R. Tolkien", Source::Epub)).await.unwrap();
        assert_eq!(repo.search_by_author(query).await.unwrap().len(), expected);
    }

    #[tokio::test]
    async fn test_search_by_series() {
        let repo = repo().await;
        let mut book = new_book("pooh", "A. A. Milne", Source::Epub);
        book.series = Some("Hundred Acre Wood".to_string());
        repo.insert_book(&book).await.unwrap();
        repo.insert_book(&new_book("hobbit", "J. R. R. Tolkien", Source::Epub)).await.unwrap();
        let found = repo.search_by_series("acre").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "pooh");
    }

    #[tokio::test]
    async fn test_update_book_patch() {
        let repo = repo().await;
        let book = repo.insert_book(&new_book("pooh", "Milne", Source::Epub)).await.unwrap();
        let patch = BookPatch { series: Some("Hundred Acre Wood".to_string()), ..Default::default() };
        let updated = repo.update_book(book.id, &patch).await.unwrap();
        assert_eq!(updated.title, "pooh");
        assert_eq!(updated.author, "Milne");
        assert_eq!(updated.series.as_deref(), Some("Hundred Acre Wood"));

        let err = repo.update_book(404, &patch).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound("book", 404)));
    }

    #[tokio::test]
    async fn test_update_versions() {
        let repo = repo().await;
        let book = repo.insert_book(&new_book("pooh", "Milne", Source::Epub)).await.unwrap();
        let mut state = VersionState::from(&book);
        state.current_words = 800;
        state.removed_chapters = vec!["Text/ch2.xhtml".to_string()];
        state.selectors = vec![".note".to_string()];
        let updated = repo.update_versions(book.id, &state).await.unwrap();
        assert_eq!(VersionState::from(&updated), state);
        assert_eq!(updated.master_words, 1000);
    }

    #[tokio::test]
    async fn test_logs() {
        let repo = repo().await;
        let book = repo.insert_book(&new_book("pooh", "Milne", Source::Epub)).await.unwrap();
        let now = UtcDateTime::now();
        let log = |kind, timestamp| NewLog {
            book_id: book.id,
            kind,
            previous_chapters: Some(3),
            new_chapters: Some(3),
            words_added: 0,
            timestamp,
        };
        assert_eq!(repo.latest_log(book.id).await.unwrap(), None);
        repo.append_log(&log(LogKind::Added, now - Duration::hours(2))).await.unwrap();
        repo.append_log(&log(LogKind::Checked, now)).await.unwrap();
        // Same timestamp: insertion order breaks the tie.
        repo.append_log(&log(LogKind::Updated, now)).await.unwrap();

        assert_eq!(repo.latest_log(book.id).await.unwrap().unwrap().kind, LogKind::Updated);
        let kinds = repo.list_logs(book.id).await.unwrap().into_iter().map(|l| l.kind).collect::<Vec<_>>();
        assert_eq!(kinds, vec![LogKind::Updated, LogKind::Checked, LogKind::Added]);

        assert!(repo.delete_book(book.id).await.unwrap());
        assert!(repo.list_logs(book.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_single_running_task() {
        let repo = repo().await;
        let task = repo.create_task(2, UtcDateTime::now()).await.unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        let err = repo.create_task(5, UtcDateTime::now()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::TaskAlreadyRunning));

        assert_eq!(repo.running_task().await.unwrap(), Some(task.clone()));
        let completed = repo.complete_task(task.id).await.unwrap();
        assert!(!completed.is_running());
        assert!(completed.completed_at.is_some());
        assert_eq!(repo.running_task().await.unwrap(), None);
        // Once completed, a new task may start.
        repo.create_task(5, UtcDateTime::now()).await.unwrap();
    }

    #[tokio::test]
    async fn test_increment_never_exceeds_total() {
        let repo = repo().await;
        let task = repo.create_task(2, UtcDateTime::now()).await.unwrap();
        assert!(repo.increment_task(task.id).await.unwrap());
        assert!(repo.increment_task(task.id).await.unwrap());
        assert!(!repo.increment_task(task.id).await.unwrap());
        assert_eq!(repo.running_task().await.unwrap().unwrap().completed_books, 2);
    }

    #[tokio::test]
    async fn test_latest_task() {
        let repo = repo().await;
        let now = UtcDateTime::now();
        let first = repo.create_task(1, now - Duration::days(7)).await.unwrap();
        repo.complete_task(first.id).await.unwrap();
        let second = repo.create_task(1, now).await.unwrap();
        assert_eq!(repo.latest_task().await.unwrap().map(|t| t.id), Some(second.id));
    }

    #[tokio::test]
    async fn test_policies() {
        let repo = repo().await;
        let policy = |name: &str| NewCleaningConfig {
            name: name.to_string(),
            url_pattern: r"example\.com".to_string(),
            chapter_selectors: vec![".authors-note-chapter".to_string()],
            content_selectors: vec![".ad".to_string()],
        };
        let first = repo.create_policy(&policy("first")).await.unwrap();
        let second = repo.create_policy(&policy("second")).await.unwrap();
        let err = repo.create_policy(&policy("first")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Conflict));

        let ids = repo.list_policies().await.unwrap().into_iter().map(|p| p.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![first.id, second.id]);

        let patch = CleaningConfigPatch { content_selectors: Some(vec![]), ..Default::default() };
        let updated = repo.update_policy(first.id, &patch).await.unwrap();
        assert!(updated.content_selectors.is_empty());
        assert_eq!(updated.chapter_selectors, first.chapter_selectors);

        assert!(repo.delete_policy(first.id).await.unwrap());
        assert!(!repo.delete_policy(first.id).await.unwrap());
        assert_eq!(repo.get_policy(first.id).await.unwrap(), None);
    }
}
