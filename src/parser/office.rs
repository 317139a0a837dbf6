use std::io::{Cursor, Read};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use zip::ZipArchive;

use super::format::{escape_html, strip_extension, DOCUMENT_ICON};
use super::text::parse_text_into_sections;
use crate::model::{ContentBlock, Section};

static SLIDE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ppt/slides/slide(\d+)\.xml$").unwrap());

/// Static sections for formats whose text could not be recovered.
pub fn placeholder_sections(file_name: &str, kind: &str) -> Vec<Section> {
    vec![
        Section::header(DOCUMENT_ICON, &escape_html(strip_extension(file_name))),
        Section::new("document", DOCUMENT_ICON, "Document").with_block(ContentBlock::text(
            format!(
                "<p>Text extraction for {} files is not available yet. Add your content here.</p>",
                kind
            ),
        )),
    ]
}

pub fn parse_docx(bytes: &[u8], file_name: &str) -> Result<Vec<Section>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).context("DOCX is not a zip archive")?;
    let xml = read_entry(&mut archive, "word/document.xml")?;
    let text = paragraphs(&xml)?.join("\n");
    Ok(sections_or_placeholder(&text, file_name, "DOCX"))
}

pub fn parse_pptx(bytes: &[u8], file_name: &str) -> Result<Vec<Section>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).context("PPTX is not a zip archive")?;
    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let n = SLIDE_RE.captures(name)?.get(1)?.as_str().parse().ok()?;
            Some((n, name.to_string()))
        })
        .collect();
    slides.sort();

    let mut lines = Vec::new();
    for (n, entry) in slides {
        let xml = read_entry(&mut archive, &entry)?;
        lines.push(format!("{}. Slide {}", n, n));
        lines.extend(paragraphs(&xml)?);
        lines.push(String::new());
    }
    Ok(sections_or_placeholder(&lines.join("\n"), file_name, "PPTX"))
}

fn sections_or_placeholder(text: &str, file_name: &str, kind: &str) -> Vec<Section> {
    if text.trim().is_empty() {
        placeholder_sections(file_name, kind)
    } else {
        parse_text_into_sections(text, file_name)
    }
}

fn read_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<String> {
    let mut entry = archive
        .by_name(name)
        .with_context(|| format!("missing archive entry {}", name))?;
    let mut xml = String::new();
    entry.read_to_string(&mut xml)?;
    Ok(xml)
}

/// Text of every `<w:p>` / `<a:p>` paragraph, in document order.
fn paragraphs(xml: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"p" => current.clear(),
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" => current.push(' '),
                _ => {}
            },
            Event::Text(e) if in_text => current.push_str(&e.unescape()?),
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push(std::mem::take(&mut current)),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    use super::*;

    fn archive(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn docx_paragraphs_feed_text_parser() {
        let xml = r#"<w:document xmlns:w="w"><w:body>
            <w:p><w:r><w:t>Introduction</w:t></w:r></w:p>
            <w:p><w:r><w:t xml:space="preserve">Hello </w:t></w:r><w:r><w:t>&amp; welcome</w:t></w:r></w:p>
            </w:body></w:document>"#;
        let bytes = archive(&[("word/document.xml", xml)]);
        let sections = parse_docx(&bytes, "memo.docx").unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[1].name, "Introduction");
        assert_eq!(sections[1].content, vec![ContentBlock::text("<p>Hello &amp; welcome</p>")]);
    }

    #[test]
    fn pptx_slides_become_sections_in_order() {
        let slide = |t: &str| format!(r#"<p:sld xmlns:a="a" xmlns:p="p"><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:sld>"#, t);
        let (s1, s2) = (slide("first"), slide("second"));
        let bytes = archive(&[("ppt/slides/slide2.xml", s2.as_str()), ("ppt/slides/slide1.xml", s1.as_str())]);
        let sections = parse_pptx(&bytes, "deck.pptx").unwrap();
        let names: Vec<_> = sections.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Header", "Slide 1", "Slide 2"]);
        assert_eq!(sections[2].content, vec![ContentBlock::text("<p>second</p>")]);
    }

    #[test]
    fn empty_docx_uses_placeholder() {
        let bytes = archive(&[("word/document.xml", "<w:document/>")]);
        let sections = parse_docx(&bytes, "blank.docx").unwrap();
        assert_eq!(sections[1].id, "document");
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_docx(b"not a zip", "x.docx").is_err());
    }
}
