//! EPUB containers and the operations a library performs on them: counting
//! words and chapters, and deriving edited copies from a pristine master.

mod consts;
mod container;
mod count;
pub mod error;
#[cfg(any(test, feature = "fixture"))]
pub mod fixture;
mod navigation;
mod package;
mod path;
mod transform;
mod xhtml;

pub use crate::container::{Container, Document, Entry};
pub use crate::count::{Stats, count, count_container, count_words};
pub use crate::navigation::TocEntry;
pub use crate::package::{ManifestItem, Metadata, Package};
pub use crate::transform::{Edits, apply, chapters_matching, parse_selector, transform};
