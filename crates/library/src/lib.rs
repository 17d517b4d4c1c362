//! The library: books on disk, their records, and keeping them up to date.
//!
//! Every book has a pristine *master* archive and a *current* archive derived
//! from it by removing chapters and stripping elements. Edits always start
//! over from the master, so they can be changed or undone at any time.
//! Web-sourced books are periodically re-downloaded by the
//! [`UpdateScheduler`]; a new download replaces the master and the matching
//! cleaning policy is applied again.

pub mod error;
pub mod paths;
mod policy;
mod refresh;
mod schedule;
mod version;

pub use crate::paths::Paths;
pub use crate::policy::PolicyMatcher;
pub use crate::schedule::{CycleReport, UpdateScheduler};
pub use crate::version::EditRequest;

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tome_fetch::FetcherHandle;
use tome_records::Repository;

/// Handle to a library. Cheap to clone; clones share the download lock.
#[derive(Clone)]
pub struct Library {
    paths: Paths,
    records: Repository,
    fetcher: FetcherHandle,
    /// Held while the download tool runs and its output is inspected.
    download: Arc<Mutex<()>>,
}

impl Library {
    pub fn new(root: impl Into<PathBuf>, records: Repository, fetcher: FetcherHandle) -> Self {
        Self { paths: Paths::new(root), records, fetcher, download: Arc::new(Mutex::new(())) }
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn records(&self) -> &Repository {
        &self.records
    }
}

/// Runs archive work on the blocking thread pool.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.or_raise(|| ErrorKind::Blocking)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tome_fetch::MockFetcher;
    use tome_records::Database;

    /// A library in a temporary directory with an in-memory record store and
    /// a scripted fetcher.
    pub(crate) struct TestLibrary {
        pub(crate) library: Library,
        pub(crate) fetcher: Arc<MockFetcher>,
        _root: tempfile::TempDir,
    }

    pub(crate) async fn test_library() -> TestLibrary {
        let root = tempfile::tempdir().unwrap();
        let db = Database::connect_in_memory().await.unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        let library = Library::new(root.path(), Repository::from(&db), fetcher.clone());
        TestLibrary { library, fetcher, _root: root }
    }

    #[tokio::test]
    async fn test_clones_share_the_download_lock() {
        let test = test_library().await;
        let clone = test.library.clone();
        let _guard = test.library.download.lock().await;
        assert!(clone.download.try_lock().is_err());
    }
}
