use crate::error::Error;
use crate::models::{from_json, timestamp};
use time::UtcDateTime;

/// A removal policy applied to web-sourced books whose URL matches
/// `url_pattern` (a regular expression, searched anywhere in the URL).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleaningConfig {
    pub id: i64,
    pub name: String,
    pub url_pattern: String,
    /// A chapter is removed when any of these matches inside it.
    pub chapter_selectors: Vec<String>,
    /// Elements matching any of these are stripped from every chapter.
    pub content_selectors: Vec<String>,
    pub created_at: UtcDateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewCleaningConfig {
    pub name: String,
    pub url_pattern: String,
    pub chapter_selectors: Vec<String>,
    pub content_selectors: Vec<String>,
}

/// Partial update of a cleaning policy. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleaningConfigPatch {
    pub name: Option<String>,
    pub url_pattern: Option<String>,
    pub chapter_selectors: Option<Vec<String>>,
    pub content_selectors: Option<Vec<String>>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct CleaningConfigRow {
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) url_pattern: String,
    pub(crate) chapter_selectors: String,
    pub(crate) content_selectors: String,
    pub(crate) created_at: i64,
}
impl TryFrom<CleaningConfigRow> for CleaningConfig {
    type Error = Error;
    fn try_from(row: CleaningConfigRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            name: row.name,
            url_pattern: row.url_pattern,
            chapter_selectors: from_json(&row.chapter_selectors, "chapter selectors")?,
            content_selectors: from_json(&row.content_selectors, "content selectors")?,
            created_at: timestamp(row.created_at, "creation date")?,
        })
    }
}
