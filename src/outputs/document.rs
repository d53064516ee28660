//! XHTML document assembly.
//!
//! Candidates are rendered into one strict XHTML 1.0 document. The e-reader
//! converter downstream rejects anything that is not well-formed XML, so
//! scraped content is never pasted in verbatim: it is parsed as HTML and
//! re-serialized as XHTML.
//!
//! # Output Structure
//!
//! ```text
//! <!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Strict//EN" ...>
//! <html xmlns="http://www.w3.org/1999/xhtml" lang="zh" xml:lang="zh">
//!   <head>...</head>
//!   <body>
//!     <section class="digest">
//!       <article><h2>{title}</h2><section>{content}</section></article>
//!       ...
//!     </section>
//!   </body>
//! </html>
//! ```

use crate::error::{DigestError, Result};
use crate::models::Candidate;
use html_escape::{decode_html_entities, encode_double_quoted_attribute, encode_text};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Node};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, instrument};

const DOCTYPE: &str = r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Strict//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-strict.dtd">"#;

const STYLE: &str = "h2{margin-bottom: 2em;}article{margin-bottom: 2em;}img {max-width: 100%;}";

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Dropped together with everything inside them.
const DROPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "iframe", "object", "template"];

static XML_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9._-]*$").expect("static regex"));

/// Remove characters XML 1.0 does not allow.
fn xml_chars(s: &str) -> String {
    s.chars()
        .filter(|&c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect()
}

fn write_children(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(&encode_text(&xml_chars(text))),
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    write_element(child, out);
                }
            }
            _ => {}
        }
    }
}

fn write_element(element: ElementRef<'_>, out: &mut String) {
    let name = element.value().name();
    if DROPPED_ELEMENTS.contains(&name) {
        return;
    }
    // unknown or namespaced tags are unwrapped, their children kept
    if !XML_NAME.is_match(name) {
        write_children(element, out);
        return;
    }

    out.push('<');
    out.push_str(name);
    for (attr, value) in element.value().attrs() {
        if !XML_NAME.is_match(attr) || attr.to_ascii_lowercase().starts_with("on") {
            continue;
        }
        out.push(' ');
        out.push_str(attr);
        out.push_str("=\"");
        out.push_str(&encode_double_quoted_attribute(&xml_chars(value)));
        out.push('"');
    }

    if VOID_ELEMENTS.contains(&name) {
        out.push_str(" />");
        return;
    }
    out.push('>');
    write_children(element, out);
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

/// Re-serialize an HTML fragment as well-formed XHTML.
///
/// Entities are decoded before parsing, so escaped markup in feed fields
/// becomes real markup. Comments are dropped.
pub fn to_xhtml(fragment: &str) -> String {
    let decoded = decode_html_entities(fragment);
    let parsed = Html::parse_fragment(&decoded);
    let mut out = String::with_capacity(decoded.len());
    write_children(parsed.root_element(), &mut out);
    out
}

/// One `<article>` per candidate inside a wrapping section.
pub fn render_section(items: &[Candidate]) -> String {
    let mut out = String::from(r#"<section class="digest">"#);
    for item in items {
        out.push_str("<article><h2>");
        out.push_str(&encode_text(&xml_chars(&item.title)));
        out.push_str("</h2><section>");
        out.push_str(&to_xhtml(&item.content));
        out.push_str("</section></article>");
    }
    out.push_str("</section>");
    out
}

/// Wrap a rendered body in the XHTML 1.0 Strict page shell.
///
/// # Arguments
///
/// * `title` - Page title; escaped and stripped of characters XML forbids
/// * `body` - Already well-formed XHTML, usually from [`render_section`]
///
/// # Returns
///
/// The complete document, doctype included, with the fixed stylesheet
/// inlined in `<head>`.
///
/// # Examples
///
/// ```ignore
/// let doc = render_document("v2ex", "<p>hi</p>");
/// assert!(doc.contains("<title>v2ex</title>"));
/// ```
pub fn render_document(title: &str, body: &str) -> String {
    format!(
        r#"{DOCTYPE}<html xmlns="http://www.w3.org/1999/xhtml" lang="zh" xml:lang="zh"><head><meta http-equiv="Content-Type" content="text/html; charset=utf-8" /><title>{}</title><style type="text/css">{STYLE}</style></head><body>{body}</body></html>"#,
        encode_text(&xml_chars(title))
    )
}

/// Render `items` and write them to `<dir>/<stem>.html`.
///
/// An existing file of that name is replaced; callers pick stems that are
/// unique within a run.
///
/// # Arguments
///
/// * `dir` - Output directory, which must already exist
/// * `stem` - File name without the `.html` extension
/// * `title` - Document title
/// * `items` - Articles rendered in order, one `<article>` each
///
/// # Returns
///
/// The path written, or [`DigestError::Io`] if the file could not be written.
///
/// # Examples
///
/// ```ignore
/// let path = write_document(Path::new("out"), "zhihu", "zhihu", &items).await?;
/// assert_eq!(path, Path::new("out/zhihu.html"));
/// ```
#[instrument(level = "info", skip(items), fields(items = items.len()))]
pub async fn write_document(
    dir: &Path,
    stem: &str,
    title: &str,
    items: &[Candidate],
) -> Result<PathBuf> {
    let path = dir.join(format!("{stem}.html"));
    let html = render_document(title, &render_section(items));
    fs::write(&path, html)
        .await
        .map_err(|e| DigestError::io(&path, e))?;
    info!(path = %path.display(), "Wrote document");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quick_xml::events::Event;
    use quick_xml::Reader;

    /// Parse `doc` as XML, checking tag balance, entities and attributes.
    fn assert_well_formed(doc: &str) {
        let mut reader = Reader::from_str(doc);
        let mut open: Vec<String> = Vec::new();
        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    for attr in e.attributes() {
                        attr.unwrap().unescape_value().unwrap();
                    }
                    open.push(String::from_utf8(e.name().as_ref().to_vec()).unwrap());
                }
                Ok(Event::End(e)) => {
                    let name = String::from_utf8(e.name().as_ref().to_vec()).unwrap();
                    assert_eq!(open.pop().as_deref(), Some(name.as_str()), "in {doc}");
                }
                Ok(Event::Empty(e)) => {
                    for attr in e.attributes() {
                        attr.unwrap().unescape_value().unwrap();
                    }
                }
                Ok(Event::Text(t)) => {
                    t.unescape().unwrap();
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => panic!("not well-formed ({e}): {doc}"),
            }
        }
        assert!(open.is_empty(), "unclosed {open:?} in {doc}");
    }

    #[test]
    fn test_void_elements_are_self_closed() {
        assert_eq!(
            to_xhtml(r#"<p>a<br>b<img src="x.png"></p>"#),
            r#"<p>a<br />b<img src="x.png" /></p>"#
        );
        // unquoted attribute values come out quoted
        assert!(to_xhtml("<img alt=pic>").contains(r#"alt="pic""#));
    }

    #[test]
    fn test_unclosed_and_stray_tags_are_repaired() {
        let out = to_xhtml("<div><p>one<p>two</span></div><b>bold");
        assert_eq!(out, "<div><p>one</p><p>two</p></div><b>bold</b>");
    }

    #[test]
    fn test_scripts_comments_and_handlers_are_dropped() {
        let out = to_xhtml(
            r#"<p onclick="evil()">hi<!-- note --><script>alert(1)</script><style>p{}</style></p>"#,
        );
        assert_eq!(out, "<p>hi</p>");
    }

    #[test]
    fn test_escaped_markup_from_feeds_is_decoded() {
        assert_eq!(to_xhtml("&lt;p&gt;from a feed&lt;/p&gt;"), "<p>from a feed</p>");
    }

    #[test]
    fn test_stray_angle_brackets_stay_text() {
        let out = to_xhtml("if a < b && c > d then");
        assert_eq!(out, "if a &lt; b &amp;&amp; c &gt; d then");
    }

    #[test]
    fn test_attribute_values_are_escaped() {
        let out = to_xhtml(r#"<a href="http://x/?a=1&amp;b=2" title='say "hi"'>l</a>"#);
        assert_well_formed(&out);
        assert!(out.contains(r#"href="http://x/?a=1&amp;b=2""#));
    }

    #[test]
    fn test_documents_are_well_formed() {
        let cases: Vec<Vec<Candidate>> = vec![
            vec![],
            vec![Candidate::new("", "")],
            vec![Candidate::new("<b>Title</b> & more", "a < b > c")],
            vec![
                Candidate::new("今日新闻", "<table><tr><td>cell<td>cell</table><img src=x>"),
                Candidate::new("ctrl\u{0007}char", "<p>x\u{0001}y</p><ul><li>one<li>two</ul>"),
                Candidate::new("http://link", "http://plain.example.com/?a=1&b=2"),
            ],
        ];
        for items in cases {
            let doc = render_document("digest", &render_section(&items));
            assert_well_formed(&doc);
        }
    }

    #[test]
    fn test_document_shell() {
        let doc = render_document("cnbeta", &render_section(&[Candidate::new("T", "<p>C</p>")]));
        assert!(doc.starts_with("<!DOCTYPE html PUBLIC"));
        assert!(doc.contains("<meta http-equiv=\"Content-Type\" content=\"text/html; charset=utf-8\" />"));
        assert!(doc.contains("img {max-width: 100%;}"));
        assert!(doc.contains(
            r#"<section class="digest"><article><h2>T</h2><section><p>C</p></section></article></section>"#
        ));
        assert!(doc.ends_with("</body></html>"));
    }

    #[tokio::test]
    async fn test_write_document() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_document(tmp.path(), "zhihu", "zhihu", &[Candidate::new("a", "b")])
            .await
            .unwrap();
        assert_eq!(path, tmp.path().join("zhihu.html"));
        assert_well_formed(&std::fs::read_to_string(path).unwrap());
    }
}
