//! Scripted fetcher for testing.

use crate::Fetcher;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// What the next fetch of a URL does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockResponse {
    /// Writes these bytes as a new archive in the output directory.
    Archive(Vec<u8>),
    /// Writes nothing and exits with this code.
    Exit(i32),
}

/// Fetcher that replays queued responses per URL instead of downloading.
///
/// A URL with nothing queued fails as if the tool had exited with code 1.
#[derive(Debug, Default)]
pub struct MockFetcher {
    responses: Mutex<HashMap<String, VecDeque<MockResponse>>>,
    calls: Mutex<Vec<String>>,
    written: AtomicUsize,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response for the next fetch of `url`.
    pub async fn respond(&self, url: impl Into<String>, response: MockResponse) {
        self.responses.lock().await.entry(url.into()).or_default().push_back(response);
    }

    /// URLs fetched so far, in order.
    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(&self, url: &str, output_dir: &Path) -> Result<()> {
        self.calls.lock().await.push(url.to_string());
        let response = self.responses.lock().await.get_mut(url).and_then(VecDeque::pop_front);
        match response {
            Some(MockResponse::Archive(bytes)) => {
                let n = self.written.fetch_add(1, Ordering::Relaxed);
                tokio::fs::create_dir_all(output_dir).await.or_raise(|| ErrorKind::Io)?;
                let path = output_dir.join(format!("mock-{n}.epub"));
                tokio::fs::write(path, bytes).await.or_raise(|| ErrorKind::Io)?;
                Ok(())
            },
            Some(MockResponse::Exit(0)) => Ok(()),
            Some(MockResponse::Exit(code)) => exn::bail!(ErrorKind::ToolFailed(code)),
            None => exn::bail!(ErrorKind::ToolFailed(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[tokio::test]
    async fn test_responses_are_consumed_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MockFetcher::new();
        fetcher.respond("a", MockResponse::Archive(b"first".to_vec())).await;
        fetcher.respond("a", MockResponse::Archive(b"second".to_vec())).await;
        fetcher.fetch("a", dir.path()).await.unwrap();
        fetcher.fetch("a", dir.path()).await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("mock-0.epub")).unwrap(), b"first");
        assert_eq!(std::fs::read(dir.path().join("mock-1.epub")).unwrap(), b"second");
        assert!(fetcher.fetch("a", dir.path()).await.is_err());
        assert_eq!(fetcher.calls().await, vec!["a", "a", "a"]);
    }

    #[rstest]
    #[case::success(0, None)]
    #[case::failure(2, Some(2))]
    #[tokio::test]
    async fn test_exit(#[case] code: i32, #[case] failed_with: Option<i32>) {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MockFetcher::new();
        fetcher.respond("a", MockResponse::Exit(code)).await;
        let result = fetcher.fetch("a", dir.path()).await;
        match failed_with {
            None => assert!(result.is_ok()),
            Some(expected) => assert!(matches!(&*result.unwrap_err(), ErrorKind::ToolFailed(c) if *c == expected)),
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
