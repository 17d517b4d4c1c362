//! Library Error Types
//!
//! Errors from the EPUB, fetch and record crates are raised into this crate's
//! [`ErrorKind`] with their own kind kept as the variant payload, so callers
//! can tell a broken archive from a failed download without walking the tree.

use derive_more::{Display, Error};
use tome_epub::error::{Error as EpubError, ErrorKind as EpubErrorKind};
use tome_fetch::error::{Error as FetchError, ErrorKind as FetchErrorKind};
use tome_records::error::{Error as RecordsError, ErrorKind as RecordsErrorKind};

/// A library error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// An archive could not be read or written as an EPUB. Aborts the
    /// operation for that book only.
    #[display("invalid archive: {_0}")]
    Format(EpubErrorKind),
    /// Downloading a book failed; nothing was changed.
    #[display("download failed: {_0}")]
    Fetch(FetchErrorKind),
    /// The download tool is missing or misconfigured. Retrying won't help
    /// until the operator intervenes.
    #[display("configuration error: {_0}")]
    Configuration(FetchErrorKind),
    #[display("record store error: {_0}")]
    Records(RecordsErrorKind),
    /// A cleaning policy's URL pattern is not a valid regular expression.
    #[display("invalid URL pattern: {_0}")]
    InvalidPattern(#[error(not(source))] String),
    #[display("book not found: {_0}")]
    NotFound(#[error(not(source))] i64),
    #[display("book already in library: {_0}")]
    AlreadyExists(#[error(not(source))] String),
    /// Only books downloaded from a URL can be refreshed.
    #[display("book is not web-sourced: {_0}")]
    NotWebSourced(#[error(not(source))] i64),
    #[display("I/O error")]
    Io,
    /// A blocking archive task panicked or was cancelled.
    #[display("background task failed")]
    Blocking,
}

impl ErrorKind {
    #[track_caller]
    pub fn epub(err: EpubError) -> Error {
        let inner = (*err).clone();
        err.raise(ErrorKind::Format(inner))
    }

    #[track_caller]
    pub fn fetch(err: FetchError) -> Error {
        let inner = (*err).clone();
        if inner.is_configuration_error() {
            err.raise(ErrorKind::Configuration(inner))
        } else {
            err.raise(ErrorKind::Fetch(inner))
        }
    }

    #[track_caller]
    pub fn records(err: RecordsError) -> Error {
        let inner = (*err).clone();
        err.raise(ErrorKind::Records(inner))
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch(inner) => inner.is_retryable(),
            Self::Records(inner) => inner.is_retryable(),
            Self::Format(inner) => inner.is_retryable(),
            Self::Io => true,
            _ => false,
        }
    }
}
