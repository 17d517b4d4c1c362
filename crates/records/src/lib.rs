//! SQLite record store for the library.
//!
//! Unlike the archives on disk, the records *are* the source of truth: which
//! file is the master of a book, which edits were applied to derive its current
//! copy, the audit trail of every refresh and the progress of update batches.
//!
//! # Architecture
//! - **Books**: one per title, either web-sourced (with a unique source URL) or
//!   uploaded.
//! - **Book logs**: append-only; the most recent entry of a book is what the
//!   update scheduler uses to decide whether a book was already processed.
//! - **Update tasks**: at most one `running` at any time.
//! - **Cleaning configs**: URL-pattern keyed removal policies, in creation order.

mod db;
pub mod error;
mod models;
mod repo;

pub use crate::db::Database;
pub use crate::models::{
    Book, BookLog, BookPatch, CleaningConfig, CleaningConfigPatch, LogKind, NewBook, NewCleaningConfig, NewLog, Source,
    SourceKind, TaskStatus, UpdateTask, VersionState,
};
pub use crate::repo::Repository;
