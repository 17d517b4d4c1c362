mod book;
mod cleaning;
mod log;
mod task;

pub use self::book::{Book, BookPatch, NewBook, Source, SourceKind, VersionState};
pub(crate) use self::book::BookRow;
pub use self::cleaning::{CleaningConfig, CleaningConfigPatch, NewCleaningConfig};
pub(crate) use self::cleaning::CleaningConfigRow;
pub use self::log::{BookLog, LogKind, NewLog};
pub(crate) use self::log::BookLogRow;
pub use self::task::{TaskStatus, UpdateTask};
pub(crate) use self::task::UpdateTaskRow;

use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use std::path::Path;
use time::UtcDateTime;

pub(crate) fn to_json(values: &[String], field: &'static str) -> Result<String> {
    serde_json::to_string(values).or_raise(|| ErrorKind::InvalidData(field))
}

pub(crate) fn from_json(value: &str, field: &'static str) -> Result<Vec<String>> {
    serde_json::from_str(value).or_raise(|| ErrorKind::InvalidData(field))
}

pub(crate) fn timestamp(value: i64, field: &'static str) -> Result<UtcDateTime> {
    UtcDateTime::from_unix_timestamp(value).or_raise(|| ErrorKind::InvalidData(field))
}

/// SQLx can't bind paths directly, and the database should never hold lossy
/// conversions of non UTF-8 paths.
pub(crate) fn path_to_str<'a>(path: &'a Path, field: &'static str) -> Result<&'a str> {
    path.to_str().ok_or_raise(|| ErrorKind::InvalidData(field))
}

pub(crate) fn to_count(value: i64, field: &'static str) -> Result<u64> {
    u64::try_from(value).or_raise(|| ErrorKind::InvalidData(field))
}

pub(crate) fn from_count(value: u64, field: &'static str) -> Result<i64> {
    i64::try_from(value).or_raise(|| ErrorKind::InvalidData(field))
}
