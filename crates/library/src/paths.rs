//! On-disk layout of a library.
//!
//! ```text
//! <root>/
//!   incoming/                  download tool output
//!   masters/<key>/<hash>.epub  pristine archives, content-addressed
//!   current/<key>.epub         edited copies handed to readers
//!   covers/<key>.<ext>
//! ```
//!
//! A book's key is derived once at ingestion and recovered later from the
//! file name of its current copy.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use rslug::slugify;
use std::io::Write;
use std::path::{Path, PathBuf};

const EXTENSION: &str = "epub";
const MAX_SLUG_BYTES: usize = 48;
const HASH_CHARS: usize = 16;
const KEY_HASH_CHARS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn incoming(&self) -> PathBuf {
        self.root.join("incoming")
    }

    /// Where a master with the given content hash is stored.
    pub fn master(&self, key: &str, hash: &str) -> PathBuf {
        self.root.join("masters").join(key).join(format!("{hash}.{EXTENSION}"))
    }

    pub fn current(&self, key: &str) -> PathBuf {
        self.root.join("current").join(format!("{key}.{EXTENSION}"))
    }

    pub fn cover(&self, key: &str, extension: &str) -> PathBuf {
        self.root.join("covers").join(format!("{key}.{extension}"))
    }
}

/// Truncated hex digest of an archive, used to name masters.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hash = blake3::hash(bytes).to_hex().to_string();
    hash.truncate(HASH_CHARS);
    hash
}

/// `<slug of title>-<hash of identity>`. The identity (source URL or content
/// hash) keeps books with the same title apart.
pub fn book_key(title: &str, identity: &str) -> String {
    // Quotation marks otherwise turn into stray hyphens.
    let marks = ['\'', '"', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{201E}', '`', '\u{00AB}', '\u{00BB}'];
    let stripped: String = title.chars().filter(|c| !marks.contains(c)).collect();
    let mut slug = slugify!(&stripped);
    slug.truncate(slug.floor_char_boundary(MAX_SLUG_BYTES));
    let slug = slug.trim_matches('-');
    let slug = if slug.is_empty() { "book" } else { slug };
    let mut hash = blake3::hash(identity.as_bytes()).to_hex().to_string();
    hash.truncate(KEY_HASH_CHARS);
    format!("{slug}-{hash}")
}

/// The key of a book, from the file name of its current copy.
pub fn key_of(current: &Path) -> Option<&str> {
    current.file_stem().and_then(|stem| stem.to_str())
}

/// Writes `bytes` to a temporary file next to `path` and renames it into
/// place, so readers never observe a partially written archive.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent).or_raise(|| ErrorKind::Io)?;
    let mut file = tempfile::NamedTempFile::new_in(parent).or_raise(|| ErrorKind::Io)?;
    file.write_all(bytes).or_raise(|| ErrorKind::Io)?;
    file.as_file().sync_all().or_raise(|| ErrorKind::Io)?;
    file.persist(path).or_raise(|| ErrorKind::Io)?;
    Ok(())
}

/// Writes a content-addressed file unless it already exists. Returns whether
/// anything was written.
pub fn write_once(path: &Path, bytes: &[u8]) -> Result<bool> {
    if path.try_exists().or_raise(|| ErrorKind::Io)? {
        return Ok(false);
    }
    write_atomic(path, bytes)?;
    Ok(true)
}
