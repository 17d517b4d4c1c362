//! Periodic refresh of every web-sourced book.
//!
//! Each cycle is recorded as an update task. The task's progress is committed
//! after every book, and a book whose latest log entry is newer than the start
//! of the task counts as done, so a cycle interrupted by a restart resumes
//! where it stopped instead of downloading everything again.

use crate::Library;
use crate::error::{ErrorKind, Result};
use std::time::Duration;
use time::UtcDateTime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tome_records::SourceKind;
use tracing::instrument;

/// Outcome of one pass over the web-sourced books.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub task_id: i64,
    /// Whether an interrupted task was picked up rather than a new one started.
    pub resumed: bool,
    pub processed: usize,
    /// Already refreshed since the task started.
    pub skipped: usize,
    pub failed: usize,
}

pub struct UpdateScheduler {
    library: Library,
    interval: Duration,
}

impl UpdateScheduler {
    pub fn new(library: Library, interval: Duration) -> Self {
        Self { library, interval }
    }

    /// Resumes a running task, or starts a cycle if the last one started at
    /// least one interval ago. Returns `None` when there was nothing to do.
    pub async fn tick(&self) -> Result<Option<CycleReport>> {
        let records = self.library.records();
        if records.running_task().await.map_err(ErrorKind::records)?.is_none()
            && let Some(latest) = records.latest_task().await.map_err(ErrorKind::records)?
        {
            let elapsed = UtcDateTime::now() - latest.started_at;
            if elapsed < self.interval {
                tracing::debug!(task = latest.id, %elapsed, "Last update cycle is recent; not starting another");
                return Ok(None);
            }
        }
        self.run_cycle().await.map(Some)
    }

    /// Refreshes every web-sourced book once, resuming the running task if
    /// there is one. A failed book is logged and skipped. A configuration
    /// error stops the cycle and leaves the task running for the next tick.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        self.run_cycle_at(UtcDateTime::now()).await
    }

    #[instrument(skip(self))]
    async fn run_cycle_at(&self, now: UtcDateTime) -> Result<CycleReport> {
        let records = self.library.records();
        let books = records.list_books_by_source(SourceKind::Web).await.map_err(ErrorKind::records)?;
        let (task, resumed) = match records.running_task().await.map_err(ErrorKind::records)? {
            Some(task) => (task, true),
            None => {
                let total = u32::try_from(books.len()).unwrap_or(u32::MAX);
                (records.create_task(total, now).await.map_err(ErrorKind::records)?, false)
            },
        };
        tracing::info!(task = task.id, resumed, books = books.len(), "Starting update cycle");

        let mut report = CycleReport { task_id: task.id, resumed, processed: 0, skipped: 0, failed: 0 };
        for book in &books {
            let latest = records.latest_log(book.id).await.map_err(ErrorKind::records)?;
            if latest.is_some_and(|log| log.timestamp >= task.started_at) {
                report.skipped += 1;
                continue;
            }
            match self.library.refresh_one(book).await {
                Ok(_) => {
                    records.increment_task(task.id).await.map_err(ErrorKind::records)?;
                    report.processed += 1;
                },
                Err(error) if matches!(&*error, ErrorKind::Configuration(_)) => {
                    tracing::error!(task = task.id, ?error, "Download tool is misconfigured; stopping update cycle");
                    return Err(error);
                },
                Err(error) => {
                    tracing::warn!(id = book.id, title = %book.title, ?error, "Refresh failed; skipping book");
                    report.failed += 1;
                },
            }
        }

        records.complete_task(task.id).await.map_err(ErrorKind::records)?;
        tracing::info!(
            task = task.id,
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed,
            "Update cycle completed"
        );
        Ok(report)
    }

    /// Runs [`tick`](Self::tick) once per interval, starting immediately.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(error) = self.tick().await {
                    tracing::error!(?error, "Update cycle failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{TestLibrary, test_library};
    use std::sync::Arc;
    use tome_fetch::CommandFetcher;
    use time::Duration as TimeDuration;
    use tome_epub::fixture::EpubBuilder;
    use tome_fetch::MockResponse;
    use tome_records::{Book, LogKind, NewLog, TaskStatus};

    const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    fn url(n: usize) -> String {
        format!("https://example.com/s/{n}")
    }

    fn story(n: usize, chapters: usize) -> Vec<u8> {
        EpubBuilder::new(format!("Story {n}")).chapters(chapters, 10).build()
    }

    /// Adds `count` web books with three chapters each and queues a
    /// five-chapter download for every one of them.
    async fn web_books(test: &TestLibrary, count: usize) -> Vec<Book> {
        let mut books = Vec::new();
        for n in 0..count {
            test.fetcher.respond(url(n), MockResponse::Archive(story(n, 3))).await;
            books.push(test.library.add_web(&url(n)).await.unwrap());
            test.fetcher.respond(url(n), MockResponse::Archive(story(n, 5))).await;
        }
        books
    }

    /// A moment after everything the test set up, so that no book counts as
    /// already refreshed by this cycle.
    fn later() -> UtcDateTime {
        UtcDateTime::now() + TimeDuration::minutes(1)
    }

    #[tokio::test]
    async fn test_full_cycle() {
        let test = test_library().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.epub");
        EpubBuilder::new("Uploaded").chapters(1, 10).write_to(&path);
        test.library.upload(&path).await.unwrap();
        let books = web_books(&test, 3).await;

        let scheduler = UpdateScheduler::new(test.library.clone(), WEEK);
        let report = scheduler.run_cycle_at(later()).await.unwrap();
        assert_eq!(report, CycleReport { task_id: report.task_id, resumed: false, processed: 3, skipped: 0, failed: 0 });

        let task = test.library.records().latest_task().await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!((task.total_books, task.completed_books), (3, 3));
        for book in books {
            let log = test.library.records().latest_log(book.id).await.unwrap().unwrap();
            assert_eq!(log.kind, LogKind::Updated);
        }
    }

    #[tokio::test]
    async fn test_resume_interrupted_cycle() {
        let test = test_library().await;
        let books = web_books(&test, 5).await;
        let records = test.library.records();

        // A cycle that got through two of five books before the process died.
        let started = later();
        let task = records.create_task(5, started).await.unwrap();
        for book in &books[..2] {
            let log = NewLog {
                book_id: book.id,
                kind: LogKind::Checked,
                previous_chapters: Some(3),
                new_chapters: Some(3),
                words_added: 0,
                timestamp: started,
            };
            records.append_log(&log).await.unwrap();
            records.increment_task(task.id).await.unwrap();
        }
        let calls_before = test.fetcher.calls().await.len();

        let scheduler = UpdateScheduler::new(test.library.clone(), WEEK);
        let report = scheduler.tick().await.unwrap().unwrap();
        assert_eq!(report, CycleReport { task_id: task.id, resumed: true, processed: 3, skipped: 2, failed: 0 });
        assert_eq!(test.fetcher.calls().await.len() - calls_before, 3);

        let task = records.latest_task().await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.completed_books, 5);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let test = test_library().await;
        let mut books = Vec::new();
        for n in 0..3 {
            test.fetcher.respond(url(n), MockResponse::Archive(story(n, 3))).await;
            books.push(test.library.add_web(&url(n)).await.unwrap());
            let next = if n == 1 { MockResponse::Exit(2) } else { MockResponse::Archive(story(n, 5)) };
            test.fetcher.respond(url(n), next).await;
        }

        let scheduler = UpdateScheduler::new(test.library.clone(), WEEK);
        let report = scheduler.run_cycle_at(later()).await.unwrap();
        assert_eq!((report.processed, report.skipped, report.failed), (2, 0, 1));
        let task = test.library.records().latest_task().await.unwrap().unwrap();
        assert_eq!(task.completed_books, 2);
        assert_eq!(task.status, TaskStatus::Completed);
        let failed = test.library.records().latest_log(books[1].id).await.unwrap().unwrap();
        assert_eq!(failed.kind, LogKind::Added);
        let refreshed = test.library.records().latest_log(books[2].id).await.unwrap().unwrap();
        assert_eq!(refreshed.kind, LogKind::Updated);
    }

    #[tokio::test]
    async fn test_configuration_error_stops_cycle() {
        let test = test_library().await;
        web_books(&test, 2).await;
        let root = tempfile::tempdir().unwrap();
        let fetcher = CommandFetcher::new(Some("fanficfare".into()), root.path().join("personal.ini"), Vec::new());
        let misconfigured = Library::new(root.path(), test.library.records().clone(), Arc::new(fetcher));

        let err = UpdateScheduler::new(misconfigured, WEEK).run_cycle_at(later()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Configuration(tome_fetch::error::ErrorKind::Configuration(_))));
        let task = test.library.records().latest_task().await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.completed_books, 0);

        // Once the tool works again the next tick picks the task back up.
        let report = UpdateScheduler::new(test.library.clone(), WEEK).tick().await.unwrap().unwrap();
        assert_eq!(report, CycleReport { task_id: task.id, resumed: true, processed: 2, skipped: 0, failed: 0 });
    }

    #[tokio::test]
    async fn test_recent_cycle_is_not_repeated() {
        let test = test_library().await;
        web_books(&test, 1).await;
        let scheduler = UpdateScheduler::new(test.library.clone(), WEEK);
        assert!(scheduler.run_cycle_at(later()).await.is_ok());
        assert!(scheduler.tick().await.unwrap().is_none());
        assert_eq!(test.fetcher.calls().await.len(), 2);
    }
}
