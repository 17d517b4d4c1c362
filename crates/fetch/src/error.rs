//! Fetch Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A fetch error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for fetch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// No download tool configured and none found on `PATH`.
    #[display("download tool not found on your system")]
    ToolNotFound,
    /// The credentials file the download tool needs does not exist. Checked
    /// before every invocation.
    #[display("credentials file not found: {}", _0.display())]
    Configuration(#[error(not(source))] PathBuf),
    /// The download tool exited with a non-zero exit code.
    #[display("download tool exited with code: {_0}")]
    ToolFailed(#[error(not(source))] i32),
    /// The download tool was killed by a signal.
    #[display("download tool was terminated")]
    Terminated,
    /// The download tool reported success but no new or modified archive
    /// appeared in the output directory.
    #[display("download produced no archive")]
    NoArchive,
    /// More than one archive appeared; refusing to guess which one is ours.
    #[display("download produced {_0} archives")]
    AmbiguousArchive(#[error(not(source))] usize),
    #[display("I/O error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if the setup is wrong, rather than the download.
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::ToolNotFound | Self::Configuration(_))
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ToolFailed(_) | Self::Terminated | Self::Io)
    }
}
