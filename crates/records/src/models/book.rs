use crate::error::{Error, ErrorKind};
use crate::models::{from_json, timestamp, to_count};
use derive_more::Display;
use std::path::PathBuf;
use std::str::FromStr;
use time::UtcDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum SourceKind {
    #[display("web")]
    Web,
    #[display("epub")]
    Epub,
}
impl FromStr for SourceKind {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web" => Ok(Self::Web),
            "epub" => Ok(Self::Epub),
            _ => exn::bail!(ErrorKind::InvalidData("source kind")),
        }
    }
}

/// Where a book came from. Only web-sourced books have a URL, and only
/// web-sourced books are ever refreshed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Web(String),
    Epub,
}
impl Source {
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Web(_) => SourceKind::Web,
            Self::Epub => SourceKind::Epub,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Web(url) => Some(url),
            Self::Epub => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub author: String,
    pub series: Option<String>,
    pub source: Source,
    /// Pristine archive as ingested or last downloaded. Never modified.
    pub master_path: PathBuf,
    /// Archive derived from the master by applying the edits below.
    pub current_path: PathBuf,
    pub cover_path: Option<PathBuf>,
    pub master_words: u64,
    pub current_words: u64,
    pub removed_chapters: Vec<String>,
    pub selectors: Vec<String>,
    pub created_at: UtcDateTime,
    pub updated_at: UtcDateTime,
}
impl Book {
    pub fn is_web(&self) -> bool {
        self.source.kind() == SourceKind::Web
    }
}

/// A book about to be ingested. Current starts out as a copy of master, so
/// both word counts are the same.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBook {
    pub title: String,
    pub author: String,
    pub series: Option<String>,
    pub source: Source,
    pub master_path: PathBuf,
    pub current_path: PathBuf,
    pub cover_path: Option<PathBuf>,
    pub words: u64,
}

/// Partial update of a book's descriptive fields. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookPatch {
    pub title: Option<String>,
    pub author: Option<String>,
    pub series: Option<String>,
    pub cover_path: Option<PathBuf>,
}
impl BookPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.author.is_none() && self.series.is_none() && self.cover_path.is_none()
    }
}

/// Everything that changes together when a book's archives are regenerated:
/// after an edit, after a re-download, after applying a cleaning policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionState {
    pub master_path: PathBuf,
    pub current_path: PathBuf,
    pub master_words: u64,
    pub current_words: u64,
    pub removed_chapters: Vec<String>,
    pub selectors: Vec<String>,
}
impl From<&Book> for VersionState {
    fn from(book: &Book) -> Self {
        Self {
            master_path: book.master_path.clone(),
            current_path: book.current_path.clone(),
            master_words: book.master_words,
            current_words: book.current_words,
            removed_chapters: book.removed_chapters.clone(),
            selectors: book.selectors.clone(),
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct BookRow {
    pub(crate) id: i64,
    pub(crate) title: String,
    pub(crate) author: String,
    pub(crate) series: Option<String>,
    pub(crate) source_kind: String,
    pub(crate) source_url: Option<String>,
    pub(crate) master_path: String,
    pub(crate) current_path: String,
    pub(crate) cover_path: Option<String>,
    pub(crate) master_words: i64,
    pub(crate) current_words: i64,
    pub(crate) removed_chapters: String,
    pub(crate) selectors: String,
    pub(crate) created_at: i64,
    pub(crate) updated_at: i64,
}
impl TryFrom<BookRow> for Book {
    type Error = Error;
    fn try_from(row: BookRow) -> Result<Self, Self::Error> {
        let source = match (row.source_kind.parse::<SourceKind>()?, row.source_url) {
            (SourceKind::Web, Some(url)) => Source::Web(url),
            (SourceKind::Epub, None) => Source::Epub,
            _ => exn::bail!(ErrorKind::InvalidData("source url")),
        };
        Ok(Self {
            id: row.id,
            title: row.title,
            author: row.author,
            series: row.series,
            source,
            master_path: PathBuf::from(row.master_path),
            current_path: PathBuf::from(row.current_path),
            cover_path: row.cover_path.map(PathBuf::from),
            master_words: to_count(row.master_words, "master words")?,
            current_words: to_count(row.current_words, "current words")?,
            removed_chapters: from_json(&row.removed_chapters, "removed chapters")?,
            selectors: from_json(&row.selectors, "selectors")?,
            created_at: timestamp(row.created_at, "creation date")?,
            updated_at: timestamp(row.updated_at, "update date")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn row(kind: &str, url: Option<&str>) -> BookRow {
        BookRow {
            id: 1,
            title: "The Teatime Cookbook".to_string(),
            author: "Winnie the Pooh".to_string(),
            series: None,
            source_kind: kind.to_string(),
            source_url: url.map(ToString::to_string),
            master_path: "masters/teatime/abc.epub".to_string(),
            current_path: "current/teatime.epub".to_string(),
            cover_path: None,
            master_words: 1200,
            current_words: 1000,
            removed_chapters: r#"["Text/ch2.xhtml"]"#.to_string(),
            selectors: "[]".to_string(),
            created_at: 1_700_000_000,
            updated_at: 1_700_000_100,
        }
    }

    #[test]
    fn test_row_to_model() {
        let book = Book::try_from(row("web", Some("https://example.com/s/1"))).unwrap();
        assert_eq!(book.source, Source::Web("https://example.com/s/1".to_string()));
        assert_eq!(book.removed_chapters, vec!["Text/ch2.xhtml"]);
        assert_eq!(book.created_at.unix_timestamp(), 1_700_000_000);
        assert!(book.is_web());
    }

    #[rstest]
    #[case::web_without_url("web", None)]
    #[case::upload_with_url("epub", Some("https://example.com"))]
    #[case::unknown_kind("pdf", None)]
    fn test_invalid_source(#[case] kind: &str, #[case] url: Option<&str>) {
        let err = Book::try_from(row(kind, url)).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData(_)));
    }

    #[test]
    fn test_invalid_json() {
        let mut row = row("epub", None);
        row.selectors = "not json".to_string();
        let err = Book::try_from(row).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData("selectors")));
    }

    #[rstest]
    #[case(SourceKind::Web, "web")]
    #[case(SourceKind::Epub, "epub")]
    fn test_source_kind_strings(#[case] kind: SourceKind, #[case] text: &str) {
        assert_eq!(kind.to_string(), text);
        assert_eq!(text.parse::<SourceKind>().unwrap(), kind);
    }
}
