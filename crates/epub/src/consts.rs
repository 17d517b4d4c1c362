use regex::Regex;
use std::sync::LazyLock;

macro_rules! regex {
    ($name:ident, $regex:expr) => {
        pub(crate) static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($regex).unwrap());
    };
}

pub(crate) const CONTAINER_PATH: &str = "META-INF/container.xml";
pub(crate) const MIMETYPE_PATH: &str = "mimetype";
pub(crate) const MIMETYPE: &[u8] = b"application/epub+zip";

pub(crate) const MEDIA_TYPE_XHTML: &str = "application/xhtml+xml";
pub(crate) const MEDIA_TYPE_HTML: &str = "text/html";
pub(crate) const MEDIA_TYPE_NCX: &str = "application/x-dtbncx+xml";

// Everything in front of the root element of an XHTML document: XML
// declaration, doctype, comments and whitespace. html5ever would otherwise
// turn the declaration into a bogus comment.
regex!(PROLOG_REGEX, r"(?is)^(?:\s+|<\?xml.*?\?>|<!doctype[^>]*>|<!--.*?-->)*");
