//! Record Store Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A record store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for record store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    #[display("{_0} not found: {_1}")]
    NotFound(#[error(not(source))] &'static str, #[error(not(source))] i64),
    /// A unique constraint was violated (duplicate source URL, policy name…).
    #[display("conflicting record")]
    Conflict,
    /// Another update task is already running.
    #[display("an update task is already running")]
    TaskAlreadyRunning,
    /// Stored data could not be converted to or from its in-memory form.
    #[display("invalid record data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database)
    }
}
