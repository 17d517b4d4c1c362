//! Downloading stories with an external tool.
//!
//! A [`Fetcher`] writes an EPUB for a story URL somewhere inside an output
//! directory; [`fetch_archive`] works out which file that was.

mod command;
pub mod discover;
pub mod error;
#[cfg(any(test, feature = "mock"))]
mod mock;

pub use crate::command::CommandFetcher;
pub use crate::discover::{Snapshot, discover};
use crate::error::Result;
#[cfg(any(test, feature = "mock"))]
pub use crate::mock::{MockFetcher, MockResponse};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::instrument;

pub type FetcherHandle = Arc<dyn Fetcher + Send + Sync>;

/// Something that can download a story as an EPUB archive.
#[async_trait]
pub trait Fetcher: Send + Sync {
    fn name(&self) -> &str;

    /// Downloads `url` into `output_dir`. Succeeding does not guarantee an
    /// archive was written; see [`fetch_archive`].
    async fn fetch(&self, url: &str, output_dir: &Path) -> Result<()>;
}

/// Downloads `url` into `output_dir` and returns the path of the archive the
/// download created or modified.
#[instrument(skip(fetcher), fields(fetcher = fetcher.name()))]
pub async fn fetch_archive(fetcher: &dyn Fetcher, url: &str, output_dir: &Path) -> Result<PathBuf> {
    let before = Snapshot::take(output_dir).await?;
    fetcher.fetch(url, output_dir).await?;
    let after = Snapshot::take(output_dir).await?;
    let path = discover(&before, &after)?;
    tracing::debug!(path = %path.display(), "Found downloaded archive");
    Ok(path)
}
