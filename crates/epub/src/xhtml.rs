//! Writes a parsed chapter back out as well-formed XHTML.
//!
//! The HTML serializer would emit `<br>` and named entities such as `&nbsp;`,
//! neither of which an XML reader accepts. Void elements are self-closed here
//! and text is escaped with the five XML entities only.

use quick_xml::escape::{escape, partial_escape};
use scraper::{ElementRef, Html, Node};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source", "track", "wbr",
];

/// Serializes the document's root element.
pub(crate) fn serialize(html: &Html) -> String {
    let mut output = String::new();
    write_element(html.root_element(), &mut output);
    output
}

fn write_element(element: ElementRef<'_>, output: &mut String) {
    let name = element.value().name();
    output.push('<');
    output.push_str(name);
    for (key, value) in element.value().attrs() {
        output.push(' ');
        output.push_str(key);
        output.push_str("=\"");
        output.push_str(&escape(value));
        output.push('"');
    }
    if !element.has_children() && VOID_ELEMENTS.contains(&name) {
        output.push_str("/>");
        return;
    }
    output.push('>');
    for child in element.children() {
        match child.value() {
            Node::Text(text) => output.push_str(&partial_escape(&**text)),
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    write_element(child, output);
                }
            },
            Node::Comment(comment) => {
                // "--" may not appear inside an XML comment.
                output.push_str("<!--");
                output.push_str(&comment.replace("--", "- -"));
                output.push_str("-->");
            },
            Node::ProcessingInstruction(pi) => {
                output.push_str("<?");
                output.push_str(&pi.target);
                output.push(' ');
                output.push_str(&pi.data);
                output.push_str("?>");
            },
            Node::Document | Node::Fragment | Node::Doctype(_) => {},
        }
    }
    output.push_str("</");
    output.push_str(name);
    output.push('>');
}

#[cfg(test)]
mod tests {
    use super::*;
    use quick_xml::Reader;
    use quick_xml::events::Event;
    use rstest::rstest;

    fn well_formed(markup: &str) -> bool {
        let mut reader = Reader::from_str(markup);
        loop {
            match reader.read_event() {
                Ok(Event::Eof) => return true,
                Ok(_) => {},
                Err(_) => return false,
            }
        }
    }

    fn roundtrip(body: &str) -> String {
        let html = Html::parse_document(&format!(
            "<html xmlns=\"http://www.w3.org/1999/xhtml\"><head><title>T</title></head><body>{body}</body></html>"
        ));
        serialize(&html)
    }

    #[rstest]
    #[case("<p>tea&#160;time<br/>next</p>", "<p>tea\u{a0}time<br/>next</p>")]
    #[case("<p>a &amp; b &lt; c</p>", "<p>a &amp; b &lt; c</p>")]
    #[case("<img alt='say \"hi\"'/>", "<img alt=\"say &quot;hi&quot;\"/>")]
    #[case("<div></div>", "<div></div>")]
    #[case("<!-- a -- b -->", "<!-- a - - b -->")]
    fn test_serialize(#[case] body: &str, #[case] expected: &str) {
        let output = roundtrip(body);
        assert!(output.contains(expected), "{output}");
        assert!(well_formed(&output), "{output}");
    }

    #[test]
    fn test_keeps_namespace() {
        let output = roundtrip("<p>x</p>");
        assert!(roundtrip("<img src=\"a.jpg\" alt=\"A\">").contains(" src=\"a.jpg\""));
        assert!(output.starts_with("<html xmlns=\"http://www.w3.org/1999/xhtml\"><head><title>T</title></head>"));
        assert!(output.ends_with("</body></html>"));
    }
}
