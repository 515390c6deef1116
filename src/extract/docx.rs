//! `.docx` paragraph walk.
//!
//! A `.docx` is a zip archive; the body lives in `word/document.xml` as a
//! sequence of `<w:p>` paragraphs, each with an optional `<w:pPr>` carrying
//! the style id (`<w:pStyle w:val="Heading1"/>`) and list numbering
//! (`<w:numPr>`), and `<w:t>` runs holding the text.

use crate::error::ConvertError;
use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use std::fs::File;
use std::io::Read;
use std::path::Path;

static HEADING_STYLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^heading\s*(\d+)$").unwrap());
static LIST_STYLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^list").unwrap());

/// One body paragraph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocxParagraph {
    /// Paragraph style id, e.g. `Heading2`, `Title`, `ListParagraph`.
    pub style: Option<String>,
    /// Whether the paragraph carries list numbering.
    pub numbered: bool,
    pub text: String,
}

impl DocxParagraph {
    /// Markdown prefix implied by the paragraph style.
    fn markdown_prefix(&self) -> String {
        let style = self.style.as_deref().unwrap_or_default();
        if style.eq_ignore_ascii_case("title") {
            return "# ".to_string();
        }
        if let Some(level) = HEADING_STYLE
            .captures(style)
            .and_then(|c| c[1].parse::<usize>().ok())
        {
            return format!("{} ", "#".repeat(level.clamp(1, 6)));
        }
        if self.numbered || LIST_STYLE.is_match(style) {
            return "- ".to_string();
        }
        String::new()
    }
}

/// Read every paragraph of `word/document.xml`, in document order.
pub fn read_paragraphs(path: &Path) -> Result<Vec<DocxParagraph>, ConvertError> {
    let unreadable = |detail: String| ConvertError::UnreadableDocument {
        path: path.to_path_buf(),
        detail,
    };

    let file = File::open(path).map_err(|e| unreadable(e.to_string()))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| unreadable(e.to_string()))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| unreadable(format!("word/document.xml: {e}")))?
        .read_to_string(&mut xml)
        .map_err(|e| unreadable(e.to_string()))?;

    parse_document_xml(&xml).map_err(unreadable)
}

fn style_value(e: &BytesStart<'_>) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == b"val")
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}

/// Paragraphs in document order of their start tags. A paragraph nested in
/// another (text boxes, for instance) gets its own entry after its parent.
fn parse_document_xml(xml: &str) -> Result<Vec<DocxParagraph>, String> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs: Vec<DocxParagraph> = Vec::new();
    // Indices into `paragraphs` of the currently open `w:p` elements.
    let mut open: Vec<usize> = Vec::new();
    let mut in_text = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| format!("malformed XML at byte {}: {e}", reader.buffer_position()))?;
        let current = open.last().copied();
        match event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"p" => {
                    open.push(paragraphs.len());
                    paragraphs.push(DocxParagraph::default());
                }
                b"t" => in_text = true,
                b"pStyle" => set_style(&mut paragraphs, current, &e),
                b"numPr" => set_numbered(&mut paragraphs, current),
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"p" => paragraphs.push(DocxParagraph::default()),
                b"pStyle" => set_style(&mut paragraphs, current, &e),
                b"numPr" => set_numbered(&mut paragraphs, current),
                b"tab" => push_text(&mut paragraphs, current, "\t"),
                b"br" | b"cr" => push_text(&mut paragraphs, current, "\n"),
                _ => {}
            },
            Event::Text(t) if in_text => {
                let text = t.unescape().map_err(|e| e.to_string())?;
                push_text(&mut paragraphs, current, &text);
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    open.pop();
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(paragraphs)
}

fn set_style(paragraphs: &mut [DocxParagraph], current: Option<usize>, e: &BytesStart<'_>) {
    if let Some(p) = current.and_then(|i| paragraphs.get_mut(i)) {
        p.style = style_value(e);
    }
}

fn set_numbered(paragraphs: &mut [DocxParagraph], current: Option<usize>) {
    if let Some(p) = current.and_then(|i| paragraphs.get_mut(i)) {
        p.numbered = true;
    }
}

fn push_text(paragraphs: &mut [DocxParagraph], current: Option<usize>, text: &str) {
    if let Some(p) = current.and_then(|i| paragraphs.get_mut(i)) {
        p.text.push_str(text);
    }
}

/// Plain text: non-empty paragraphs joined by a blank line.
pub fn plain_text(paragraphs: &[DocxParagraph]) -> String {
    paragraphs
        .iter()
        .map(|p| p.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Style-driven Markdown for the non-AI conversion.
pub fn render_markdown(paragraphs: &[DocxParagraph]) -> String {
    paragraphs
        .iter()
        .filter(|p| !p.text.trim().is_empty())
        .map(|p| format!("{}{}", p.markdown_prefix(), p.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Markdown for text pulled through the office engine, which carries no
/// styles: every non-empty line becomes a paragraph.
pub fn lines_to_markdown(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    /// Wrap `<w:p>` fragments in a minimal document and zip it up.
    pub(crate) fn write_docx(path: &Path, body: &str) {
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}</w:body></w:document>"#
        );
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        zip.start_file("word/document.xml", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }

    fn para(style: Option<&str>, text: &str) -> String {
        let ppr = style
            .map(|s| format!(r#"<w:pPr><w:pStyle w:val="{s}"/></w:pPr>"#))
            .unwrap_or_default();
        format!(r#"<w:p>{ppr}<w:r><w:t xml:space="preserve">{text}</w:t></w:r></w:p>"#)
    }

    #[test]
    fn walks_paragraphs_with_styles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.docx");
        let body = [
            para(Some("Title"), "Report"),
            para(Some("Heading2"), "Scope"),
            para(None, "Body &amp; more"),
            r#"<w:p><w:pPr><w:numPr><w:ilvl w:val="0"/><w:numId w:val="1"/></w:numPr></w:pPr><w:r><w:t>first</w:t></w:r></w:p>"#.to_string(),
            "<w:p/>".to_string(),
        ]
        .concat();
        write_docx(&path, &body);

        let paragraphs = read_paragraphs(&path).unwrap();
        assert_eq!(paragraphs.len(), 5);
        assert_eq!(paragraphs[0].style.as_deref(), Some("Title"));
        assert_eq!(paragraphs[2].text, "Body & more");
        assert!(paragraphs[3].numbered);
        assert_eq!(
            plain_text(&paragraphs),
            "Report\n\nScope\n\nBody & more\n\nfirst"
        );
    }

    #[test]
    fn renders_simple_markdown() {
        let paragraphs = vec![
            DocxParagraph {
                style: Some("Title".into()),
                numbered: false,
                text: "Report".into(),
            },
            DocxParagraph {
                style: Some("Heading9".into()),
                numbered: false,
                text: "Deep".into(),
            },
            DocxParagraph {
                style: Some("ListBullet".into()),
                numbered: false,
                text: "item".into(),
            },
            DocxParagraph {
                style: None,
                numbered: false,
                text: "   ".into(),
            },
            DocxParagraph {
                style: None,
                numbered: false,
                text: "plain".into(),
            },
        ];
        assert_eq!(
            render_markdown(&paragraphs),
            "# Report\n\n###### Deep\n\n- item\n\nplain"
        );
    }

    #[test]
    fn runs_are_concatenated_with_tabs_and_breaks() {
        let xml = r#"<w:document xmlns:w="w"><w:body><w:p><w:r><w:t>a</w:t><w:tab/><w:t>b</w:t><w:br/><w:t>c</w:t></w:r></w:p></w:body></w:document>"#;
        let paragraphs = parse_document_xml(xml).unwrap();
        assert_eq!(paragraphs[0].text, "a\tb\nc");
    }

    #[test]
    fn nested_text_box_paragraph_keeps_the_outer_one() {
        let xml = concat!(
            r#"<w:document xmlns:w="w"><w:body>"#,
            r#"<w:p><w:pPr><w:pStyle w:val="Heading1"/></w:pPr><w:r><w:t>Before </w:t></w:r>"#,
            r#"<w:r><w:txbxContent><w:p><w:pPr><w:pStyle w:val="Caption"/></w:pPr>"#,
            r#"<w:r><w:t>Boxed</w:t></w:r></w:p></w:txbxContent></w:r>"#,
            r#"<w:r><w:t>after</w:t></w:r></w:p>"#,
            r#"<w:p><w:r><w:t>Next</w:t></w:r></w:p>"#,
            r#"</w:body></w:document>"#,
        );
        let paragraphs = parse_document_xml(xml).unwrap();
        assert_eq!(paragraphs.len(), 3);
        assert_eq!(paragraphs[0].text, "Before after");
        assert_eq!(paragraphs[0].style.as_deref(), Some("Heading1"));
        assert_eq!(paragraphs[1].text, "Boxed");
        assert_eq!(paragraphs[1].style.as_deref(), Some("Caption"));
        assert_eq!(paragraphs[2].text, "Next");
    }

    #[test]
    fn not_a_zip_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.docx");
        std::fs::write(&path, b"plain text, not a zip").unwrap();
        let err = read_paragraphs(&path).unwrap_err();
        assert!(matches!(err, ConvertError::UnreadableDocument { .. }));
    }

    #[test]
    fn engine_text_lines_become_paragraphs() {
        assert_eq!(lines_to_markdown("one\r\n\n  two  \n"), "one\n\ntwo");
    }
}
