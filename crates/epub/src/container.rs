use crate::consts;
use crate::error::{ErrorKind, Result};
use crate::navigation::{self, TocEntry};
use crate::package::{self, ManifestItem, Metadata, Package};
use crate::path::{parent, resolve, strip_fragment};
use exn::{OptionExt, ResultExt};
use std::collections::HashSet;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use tracing::instrument;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

/// A file inside the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub data: Vec<u8>,
}

/// A chapter: a document item of the manifest together with its markup.
#[derive(Debug, Clone, Copy)]
pub struct Document<'a> {
    pub item: &'a ManifestItem,
    /// Archive entry name of the document.
    pub path: &'a str,
    pub markup: &'a [u8],
}
impl Document<'_> {
    /// The chapter's stable identifier (its manifest href).
    pub fn name(&self) -> &str {
        &self.item.href
    }
}

/// An EPUB held entirely in memory.
///
/// Entries keep their original order and content; only the package document,
/// the navigation documents and edited chapters are ever rewritten.
#[derive(Debug, Clone)]
pub struct Container {
    entries: Vec<Entry>,
    package: Package,
    package_path: String,
}

impl Container {
    #[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref()).or_raise(|| ErrorKind::Io)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).or_raise(|| ErrorKind::Archive)?;
        let mut entries = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let mut file = archive.by_index(index).or_raise(|| ErrorKind::Archive)?;
            if file.is_dir() {
                continue;
            }
            let mut data = Vec::new();
            file.read_to_end(&mut data).or_raise(|| ErrorKind::Archive)?;
            entries.push(Entry { name: file.name().to_string(), data });
        }

        let container = entries
            .iter()
            .find(|e| e.name == consts::CONTAINER_PATH)
            .ok_or_raise(|| ErrorKind::MissingEntry(consts::CONTAINER_PATH.to_string()))?;
        let package_path = package::parse_container(&container.data)?;
        let opf = entries
            .iter()
            .find(|e| e.name == package_path)
            .ok_or_raise(|| ErrorKind::MissingEntry(package_path.clone()))?;
        let package = package::parse(&opf.data)?;
        Ok(Self { entries, package, package_path })
    }

    pub fn package(&self) -> &Package {
        &self.package
    }

    pub fn metadata(&self) -> &Metadata {
        &self.package.metadata
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entry(&self, name: &str) -> Option<&[u8]> {
        self.entries.iter().find(|e| e.name == name).map(|e| e.data.as_slice())
    }

    /// Replaces the content of an existing entry. Returns `false` if there is
    /// no entry by that name.
    pub fn set_entry(&mut self, name: &str, data: Vec<u8>) -> bool {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => {
                entry.data = data;
                true
            },
            None => false,
        }
    }

    /// Directory of the package document; manifest hrefs are relative to it.
    fn root(&self) -> &str {
        parent(&self.package_path)
    }

    /// Archive entry name of a manifest item.
    pub fn item_path(&self, item: &ManifestItem) -> String {
        resolve(self.root(), &item.href)
    }

    /// Chapters, in manifest order. Document items without a matching archive
    /// entry are skipped.
    pub fn documents(&self) -> Vec<Document<'_>> {
        self.package
            .manifest
            .iter()
            .filter(|item| item.is_document())
            .filter_map(|item| {
                let path = self.item_path(item);
                match self.entries.iter().find(|e| e.name == path) {
                    Some(entry) => Some(Document { item, path: &entry.name, markup: &entry.data }),
                    None => {
                        tracing::warn!(href = %item.href, "Manifest document missing from archive");
                        None
                    },
                }
            })
            .collect()
    }

    /// Table of contents, from the NCX if there is one, else from the EPUB 3
    /// navigation document.
    pub fn toc(&self) -> Result<Vec<TocEntry>> {
        let sources = [(self.package.ncx(), &navigation::NCX), (self.package.navigation(), &navigation::NAV)];
        for (item, dialect) in sources {
            let Some(item) = item else { continue };
            let path = self.item_path(item);
            let data = self.entry(&path).ok_or_raise(|| ErrorKind::MissingEntry(path.clone()))?;
            return navigation::parse(data, parent(&path), dialect);
        }
        Ok(Vec::new())
    }

    /// The cover image item and its bytes, if the package declares one.
    pub fn cover(&self) -> Option<(&ManifestItem, &[u8])> {
        let item = self.package.cover()?;
        self.entry(&self.item_path(item)).map(|data| (item, data))
    }

    /// Removes chapters (by manifest href) from the manifest, the spine, the
    /// guide, both navigation documents and the archive itself. Names that
    /// don't refer to a chapter are ignored. Returns the number of chapters
    /// removed.
    #[instrument(level = "debug", skip_all, fields(requested = names.len()))]
    pub fn remove_documents<S: AsRef<str>>(&mut self, names: &[S]) -> Result<usize> {
        let requested = names.iter().map(AsRef::as_ref).collect::<HashSet<&str>>();
        let removed = self
            .package
            .manifest
            .iter()
            .filter(|item| item.is_document() && requested.contains(item.href.as_str()))
            .cloned()
            .collect::<Vec<_>>();
        if removed.len() < requested.len() {
            tracing::debug!(
                unknown = requested.len() - removed.len(),
                "Ignoring chapter identifiers that are not in the manifest"
            );
        }
        if removed.is_empty() {
            return Ok(0);
        }

        let ids = removed.iter().map(|item| item.id.as_str()).collect::<HashSet<_>>();
        let hrefs = removed.iter().map(|item| strip_fragment(&item.href)).collect::<HashSet<_>>();
        let paths = removed.iter().map(|item| self.item_path(item)).collect::<HashSet<_>>();

        let opf = self
            .entry(&self.package_path)
            .ok_or_raise(|| ErrorKind::MissingEntry(self.package_path.clone()))?;
        let opf = package::rewrite(opf, &ids, &hrefs)?;

        let mut rewritten = Vec::new();
        let sources = [(self.package.ncx(), &navigation::NCX), (self.package.navigation(), &navigation::NAV)];
        for (item, dialect) in sources {
            let Some(item) = item else { continue };
            let path = self.item_path(item);
            if let Some(data) = self.entry(&path) {
                rewritten.push((path.clone(), navigation::filter(data, parent(&path), &paths, dialect)?));
            }
        }

        // Nothing is modified until every rewrite has succeeded.
        let package = package::parse(&opf)?;
        let package_path = self.package_path.clone();
        self.set_entry(&package_path, opf);
        for (path, data) in rewritten {
            self.set_entry(&path, data);
        }
        self.entries.retain(|e| !paths.contains(&e.name));
        self.package = package;
        Ok(removed.len())
    }

    /// Serializes the container. The `mimetype` entry is always written first
    /// and uncompressed; every other entry keeps its order. Timestamps are
    /// fixed so identical content produces identical bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let stored = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .last_modified_time(DateTime::default());
        let deflated = stored.compression_method(CompressionMethod::Deflated);

        zip.start_file(consts::MIMETYPE_PATH, stored).or_raise(|| ErrorKind::Archive)?;
        zip.write_all(consts::MIMETYPE).or_raise(|| ErrorKind::Io)?;
        for entry in self.entries.iter().filter(|e| e.name != consts::MIMETYPE_PATH) {
            zip.start_file(entry.name.as_str(), deflated).or_raise(|| ErrorKind::Archive)?;
            zip.write_all(&entry.data).or_raise(|| ErrorKind::Io)?;
        }
        Ok(zip.finish().or_raise(|| ErrorKind::Archive)?.into_inner())
    }

    #[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_bytes()?).or_raise(|| ErrorKind::Io)
    }
}
