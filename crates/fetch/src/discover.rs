//! Finding the archive a download produced.
//!
//! Download tools don't report what they wrote, so the output directory is
//! listed before and after the run. Callers must make sure nothing else
//! writes to that directory in the meantime.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::collections::HashMap;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const EXTENSION: &str = "epub";

/// Size and modification time of every archive in a directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    files: HashMap<PathBuf, (u64, Option<SystemTime>)>,
}

impl Snapshot {
    /// Lists the archives in `dir`. A missing directory is an empty snapshot.
    pub async fn take(dir: &Path) -> Result<Self> {
        let mut files = HashMap::new();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e).or_raise(|| ErrorKind::Io),
        };
        while let Some(entry) = entries.next_entry().await.or_raise(|| ErrorKind::Io)? {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case(EXTENSION)) {
                continue;
            }
            let metadata = entry.metadata().await.or_raise(|| ErrorKind::Io)?;
            if metadata.is_file() {
                files.insert(path, (metadata.len(), metadata.modified().ok()));
            }
        }
        Ok(Self { files })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Archives that are new, or whose size or modification time changed,
    /// compared to `before`. Sorted by path.
    pub fn changed_since(&self, before: &Snapshot) -> Vec<PathBuf> {
        let mut changed = self
            .files
            .iter()
            .filter(|(path, signature)| before.files.get(*path) != Some(*signature))
            .map(|(path, _)| path.clone())
            .collect::<Vec<_>>();
        changed.sort();
        changed
    }
}

/// The single archive that changed between two snapshots.
pub fn discover(before: &Snapshot, after: &Snapshot) -> Result<PathBuf> {
    let mut changed = after.changed_since(before);
    match changed.len() {
        0 => exn::bail!(ErrorKind::NoArchive),
        1 => Ok(changed.remove(0)),
        n => {
            tracing::warn!(candidates = ?changed, "Download produced more than one archive");
            exn::bail!(ErrorKind::AmbiguousArchive(n))
        },
    }
}
