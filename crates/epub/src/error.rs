//! EPUB Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// An EPUB error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for EPUB operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The file is not a readable zip container.
    #[display("archive is not a valid zip container")]
    Archive,
    /// A file the container structure refers to is missing from the archive.
    #[display("missing archive entry: {_0}")]
    MissingEntry(#[error(not(source))] String),
    /// The package document (or `container.xml`) could not be parsed.
    #[display("malformed package document: {_0}")]
    Package(#[error(not(source))] String),
    /// A navigation document (NCX or EPUB 3 nav) could not be parsed.
    #[display("malformed navigation document: {_0}")]
    Navigation(#[error(not(source))] String),
    /// A CSS selector could not be parsed. Never escapes the transformer; the
    /// selector is logged and skipped instead.
    #[display("invalid selector: {_0}")]
    InvalidSelector(#[error(not(source))] String),
    /// Reading or writing the archive on disk failed.
    #[display("I/O error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if the archive itself is unusable (not a zip, missing
    /// structure, unparseable package). These abort the operation for that
    /// book only.
    pub fn is_format_error(&self) -> bool {
        matches!(self, Self::Archive | Self::MissingEntry(_) | Self::Package(_) | Self::Navigation(_))
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io)
    }
}
