use crate::error::{Error, ErrorKind};
use crate::models::timestamp;
use derive_more::Display;
use exn::ResultExt;
use std::str::FromStr;
use time::UtcDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum LogKind {
    /// First ingestion of a book.
    #[display("added")]
    Added,
    /// A refresh found more chapters than before.
    #[display("updated")]
    Updated,
    /// A refresh found nothing new.
    #[display("checked")]
    Checked,
}
impl FromStr for LogKind {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "added" => Ok(Self::Added),
            "updated" => Ok(Self::Updated),
            "checked" => Ok(Self::Checked),
            _ => exn::bail!(ErrorKind::InvalidData("log kind")),
        }
    }
}

/// An entry in a book's audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookLog {
    pub id: i64,
    pub book_id: i64,
    pub kind: LogKind,
    pub previous_chapters: Option<u32>,
    pub new_chapters: Option<u32>,
    /// Negative when a refresh shrank the book; tolerated, never rejected.
    pub words_added: i64,
    pub timestamp: UtcDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLog {
    pub book_id: i64,
    pub kind: LogKind,
    pub previous_chapters: Option<u32>,
    pub new_chapters: Option<u32>,
    pub words_added: i64,
    pub timestamp: UtcDateTime,
}

#[derive(sqlx::FromRow)]
pub(crate) struct BookLogRow {
    pub(crate) id: i64,
    pub(crate) book_id: i64,
    pub(crate) kind: String,
    pub(crate) previous_chapters: Option<i64>,
    pub(crate) new_chapters: Option<i64>,
    pub(crate) words_added: i64,
    pub(crate) timestamp: i64,
}
impl TryFrom<BookLogRow> for BookLog {
    type Error = Error;
    fn try_from(row: BookLogRow) -> Result<Self, Self::Error> {
        let chapters = |value: Option<i64>| {
            value.map(u32::try_from).transpose().or_raise(|| ErrorKind::InvalidData("chapter count"))
        };
        Ok(Self {
            id: row.id,
            book_id: row.book_id,
            kind: row.kind.parse()?,
            previous_chapters: chapters(row.previous_chapters)?,
            new_chapters: chapters(row.new_chapters)?,
            words_added: row.words_added,
            timestamp: timestamp(row.timestamp, "log timestamp")?,
        })
    }
}
