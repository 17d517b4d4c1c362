//! Small, well-formed EPUB 3 archives for tests.
//!
//! Every archive carries both an NCX and a navigation document so that both
//! table of contents dialects are exercised.

use quick_xml::escape::escape;
use std::io::{Cursor, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

struct Chapter {
    href: String,
    title: String,
    body: String,
}

#[derive(Default)]
pub struct EpubBuilder {
    title: String,
    authors: Vec<String>,
    series: Option<String>,
    chapters: Vec<Chapter>,
    images: Vec<(String, Vec<u8>)>,
    cover: Option<String>,
}

/// A paragraph of `words` distinct words.
pub fn paragraph(words: usize) -> String {
    let words = (0..words).map(|i| format!("word{i}")).collect::<Vec<_>>();
    format!("<p>{}</p>", words.join(" "))
}

/// Manifest ids are the file stem of the href.
fn id(href: &str) -> &str {
    let name = href.rsplit('/').next().unwrap_or(href);
    name.split('.').next().unwrap_or(name)
}

impl EpubBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self { title: title.into(), ..Default::default() }
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.authors.push(author.into());
        self
    }

    pub fn series(mut self, series: impl Into<String>) -> Self {
        self.series = Some(series.into());
        self
    }

    /// Adds a chapter. `href` is relative to the package document and `body`
    /// is the inner markup of `<body>`.
    pub fn chapter(mut self, href: impl Into<String>, title: impl Into<String>, body: impl Into<String>) -> Self {
        self.chapters.push(Chapter { href: href.into(), title: title.into(), body: body.into() });
        self
    }

    /// Adds `count` chapters named `Text/chN.xhtml`, each containing
    /// `words` words.
    pub fn chapters(mut self, count: usize, words: usize) -> Self {
        let start = self.chapters.len();
        for n in start + 1..=start + count {
            self = self.chapter(format!("Text/ch{n}.xhtml"), format!("Chapter {n}"), paragraph(words));
        }
        self
    }

    pub fn image(mut self, href: impl Into<String>, data: Vec<u8>) -> Self {
        self.images.push((href.into(), data));
        self
    }

    pub fn cover(mut self, href: impl Into<String>, data: Vec<u8>) -> Self {
        let href = href.into();
        self.cover = Some(href.clone());
        self.image(href, data)
    }

    fn opf(&self) -> String {
        let mut metadata = format!("    <dc:identifier id=\"uid\">urn:tome:{}</dc:identifier>\n", escape(&self.title));
        metadata += &format!("    <dc:title>{}</dc:title>\n", escape(&self.title));
        for author in &self.authors {
            metadata += &format!("    <dc:creator>{}</dc:creator>\n", escape(author));
        }
        metadata += "    <dc:language>en</dc:language>\n";
        if let Some(series) = &self.series {
            metadata += &format!("    <meta name=\"calibre:series\" content=\"{}\"/>\n", escape(series));
        }
        if let Some(cover) = &self.cover {
            metadata += &format!("    <meta name=\"cover\" content=\"{}\"/>\n", id(cover));
        }

        let mut manifest = String::from(
            "    <item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\"/>\n    \
             <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\"/>\n    \
             <item id=\"css\" href=\"style.css\" media-type=\"text/css\"/>\n",
        );
        let mut spine = String::new();
        for chapter in &self.chapters {
            let id = id(&chapter.href);
            manifest += &format!(
                "    <item id=\"{id}\" href=\"{}\" media-type=\"application/xhtml+xml\"/>\n",
                chapter.href
            );
            spine += &format!("    <itemref idref=\"{id}\"/>\n");
        }
        for (href, _) in &self.images {
            let properties = match self.cover.as_deref() == Some(href.as_str()) {
                true => " properties=\"cover-image\"",
                false => "",
            };
            manifest += &format!(
                "    <item id=\"{}\" href=\"{href}\" media-type=\"image/jpeg\"{properties}/>\n",
                id(href)
            );
        }

        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <package xmlns=\"http://www.idpf.org/2007/opf\" version=\"3.0\" unique-identifier=\"uid\">\n  \
             <metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\">\n{metadata}  </metadata>\n  \
             <manifest>\n{manifest}  </manifest>\n  \
             <spine toc=\"ncx\">\n{spine}  </spine>\n\
             </package>\n"
        )
    }

    fn ncx(&self) -> String {
        let points = self
            .chapters
            .iter()
            .enumerate()
            .map(|(i, chapter)| {
                format!(
                    "    <navPoint id=\"np{n}\" playOrder=\"{n}\">\n      \
                     <navLabel><text>{}</text></navLabel>\n      \
                     <content src=\"{}\"/>\n    </navPoint>\n",
                    escape(&chapter.title),
                    chapter.href,
                    n = i + 1,
                )
            })
            .collect::<String>();
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <ncx xmlns=\"http://www.daisy.org/z3986/2005/ncx/\" version=\"2005-1\">\n  \
             <head><meta name=\"dtb:uid\" content=\"urn:tome:{title}\"/></head>\n  \
             <docTitle><text>{title}</text></docTitle>\n  \
             <navMap>\n{points}  </navMap>\n</ncx>\n",
            title = escape(&self.title),
        )
    }

    fn nav(&self) -> String {
        let items = self
            .chapters
            .iter()
            .map(|chapter| format!("        <li><a href=\"{}\">{}</a></li>\n", chapter.href, escape(&chapter.title)))
            .collect::<String>();
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<!DOCTYPE html>\n\
             <html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\">\n\
             <head><title>Contents</title></head>\n<body>\n  \
             <nav epub:type=\"toc\" id=\"toc\">\n    <ol>\n{items}    </ol>\n  </nav>\n</body>\n</html>\n"
        )
    }

    fn document(chapter: &Chapter) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<!DOCTYPE html>\n\
             <html xmlns=\"http://www.w3.org/1999/xhtml\">\n<head><title></title></head>\n\
             <body>{}</body>\n</html>\n",
            chapter.body
        )
    }

    pub fn build(&self) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        let mut files: Vec<(String, Vec<u8>)> = vec![
            ("META-INF/container.xml".into(), CONTAINER_XML.into()),
            ("OEBPS/content.opf".into(), self.opf().into_bytes()),
            ("OEBPS/toc.ncx".into(), self.ncx().into_bytes()),
            ("OEBPS/nav.xhtml".into(), self.nav().into_bytes()),
            ("OEBPS/style.css".into(), b"p { margin: 0; }\n".to_vec()),
        ];
        for chapter in &self.chapters {
            files.push((format!("OEBPS/{}", chapter.href), Self::document(chapter).into_bytes()));
        }
        for (href, data) in &self.images {
            files.push((format!("OEBPS/{href}"), data.clone()));
        }

        zip.start_file("mimetype", stored).unwrap();
        zip.write_all(b"application/epub+zip").unwrap();
        for (name, data) in files {
            zip.start_file(name.as_str(), deflated).unwrap();
            zip.write_all(&data).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    pub fn write_to(&self, path: impl AsRef<Path>) {
        std::fs::write(path, self.build()).unwrap();
    }
}
