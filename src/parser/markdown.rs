use std::sync::LazyLock;

use regex::Regex;

use super::format::{escape_html, icon_for_heading, strip_extension, DOCUMENT_ICON};
use crate::model::{ContentBlock, Section};

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#{1,3}[ \t]+(.+)$").unwrap());
static LIST_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[*-]|\d+\.)\s+(.+)$").unwrap());
static BOLD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*|__(.+?)__").unwrap());
static ITALIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*([^*]+?)\*|\b_([^_]+?)_\b").unwrap());
static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\(([^)\s]+)\)").unwrap());

const NAME_LIMIT: usize = 30;

/// Split Markdown on `#`..`###` headings; each heading and its body becomes a section.
pub fn parse_markdown_into_sections(markdown: &str, file_name: &str) -> Vec<Section> {
    let headings: Vec<_> = HEADING_RE.captures_iter(markdown).collect();

    let title = headings
        .first()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| strip_extension(file_name).to_string());
    let mut sections = vec![Section::header(DOCUMENT_ICON, &escape_html(&title))];

    if headings.is_empty() {
        sections.push(
            Section::new("content", DOCUMENT_ICON, "Content")
                .with_block(ContentBlock::text(markdown_to_html(markdown))),
        );
        return sections;
    }

    let preamble_end = headings[0].get(0).map_or(0, |m| m.start());
    let preamble = &markdown[..preamble_end];
    if !preamble.trim().is_empty() {
        sections.push(
            Section::new("section-0", "📖", "Introduction")
                .with_block(ContentBlock::text(markdown_to_html(preamble))),
        );
    }

    for (i, caps) in headings.iter().enumerate() {
        let (Some(whole), Some(heading)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let body_end = headings
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(markdown.len(), |m| m.start());
        let heading = heading.as_str().trim();
        let body = &markdown[whole.end()..body_end];
        let name: String = heading.chars().take(NAME_LIMIT).collect();

        sections.push(
            Section::new(
                format!("section-{}", i + 1),
                icon_for_heading(&heading.to_lowercase()),
                name,
            )
            .with_block(ContentBlock::text(markdown_to_html(body))),
        );
    }

    sections
}

/// Blank-line separated blocks become `<p>` runs; list lines become `<ul>` items.
pub fn markdown_to_html(markdown: &str) -> String {
    let mut html = String::new();
    let normalized = markdown.replace("\r\n", "\n");

    for block in normalized.split("\n\n") {
        let mut paragraph: Vec<&str> = Vec::new();
        let mut items: Vec<&str> = Vec::new();

        for line in block.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match LIST_ITEM_RE.captures(line).and_then(|caps| caps.get(1)) {
                Some(item) => {
                    flush_paragraph(&mut paragraph, &mut html);
                    items.push(item.as_str());
                }
                None => {
                    flush_items(&mut items, &mut html);
                    paragraph.push(line);
                }
            }
        }
        flush_items(&mut items, &mut html);
        flush_paragraph(&mut paragraph, &mut html);
    }
    html
}

fn flush_paragraph(paragraph: &mut Vec<&str>, html: &mut String) {
    if paragraph.is_empty() {
        return;
    }
    html.push_str(&format!("<p>{}</p>", inline_to_html(&paragraph.join(" "))));
    paragraph.clear();
}

fn flush_items(items: &mut Vec<&str>, html: &mut String) {
    if items.is_empty() {
        return;
    }
    html.push_str("<ul>");
    for item in items.drain(..) {
        html.push_str(&format!("<li>{}</li>", inline_to_html(item)));
    }
    html.push_str("</ul>");
}

/// Escape, then turn links into anchors; emphasis never reaches an `href`.
fn inline_to_html(text: &str) -> String {
    let escaped = escape_html(text);
    let mut html = String::new();
    let mut last = 0;
    for caps in LINK_RE.captures_iter(&escaped) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        html.push_str(&emphasis(&escaped[last..whole.start()]));
        let href = if caps[2].trim().to_lowercase().starts_with("javascript:") {
            "#"
        } else {
            &caps[2]
        };
        html.push_str(&format!(
            r#"<a href="{}" target="_blank">{}</a>"#,
            href,
            emphasis(&caps[1])
        ));
        last = whole.end();
    }
    html.push_str(&emphasis(&escaped[last..]));
    html
}

fn emphasis(text: &str) -> String {
    let bold = BOLD_RE.replace_all(text, |caps: &regex::Captures| {
        let inner = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
        format!("<strong>{}</strong>", inner)
    });
    ITALIC_RE
        .replace_all(&bold, |caps: &regex::Captures| {
            let inner = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            format!("<em>{}</em>", inner)
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_heading_becomes_title() {
        let md = "# Project Plan\nIntro text\n## Goals\n* ship it\n* test it\n";
        let sections = parse_markdown_into_sections(md, "plan.md");
        assert_eq!(sections[0].content, vec![ContentBlock::text("<h1>Project Plan</h1>")]);
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[1].id, "section-1");
        assert_eq!(sections[2].id, "section-2");
        assert_eq!(sections[2].name, "Goals");
        assert_eq!(sections[2].icon, "🎯");
        assert_eq!(
            sections[2].content,
            vec![ContentBlock::text("<ul><li>ship it</li><li>test it</li></ul>")]
        );
    }

    #[test]
    fn no_headings_falls_back_to_content() {
        let sections = parse_markdown_into_sections("plain **bold** text", "notes.md");
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].content, vec![ContentBlock::text("<h1>notes</h1>")]);
        assert_eq!(sections[1].name, "Content");
        assert_eq!(
            sections[1].content,
            vec![ContentBlock::text("<p>plain <strong>bold</strong> text</p>")]
        );
    }

    #[test]
    fn long_heading_is_truncated() {
        let md = "## This heading is far longer than thirty characters\nbody";
        let sections = parse_markdown_into_sections(md, "x.md");
        assert_eq!(sections[1].name.chars().count(), 30);
    }

    #[test]
    fn deeper_headings_stay_in_body() {
        let md = "# T\n#### Not a split\ntext";
        let sections = parse_markdown_into_sections(md, "x.md");
        assert_eq!(sections.len(), 2);
        assert!(sections[1].content[0].value().contains("#### Not a split"));
    }

    #[test]
    fn preamble_is_kept() {
        let sections = parse_markdown_into_sections("lead in\n\n# Title\nbody", "x.md");
        assert_eq!(sections[1].name, "Introduction");
        assert_eq!(sections[1].content, vec![ContentBlock::text("<p>lead in</p>")]);
    }

    #[test]
    fn inline_markup() {
        assert_eq!(
            markdown_to_html("*a* and _b_ and __c__ [site](https://x.io)"),
            r#"<p><em>a</em> and <em>b</em> and <strong>c</strong> <a href="https://x.io" target="_blank">site</a></p>"#
        );
        assert_eq!(markdown_to_html("snake_case_name"), "<p>snake_case_name</p>");
    }

    #[test]
    fn link_targets_are_left_alone() {
        assert_eq!(
            markdown_to_html("[t](https://a.com/_x_/y) and [**b**](https://b.io/*c*)"),
            r#"<p><a href="https://a.com/_x_/y" target="_blank">t</a> and <a href="https://b.io/*c*" target="_blank"><strong>b</strong></a></p>"#
        );
    }

    #[test]
    fn raw_html_is_escaped_and_scripts_neutralized() {
        let html = markdown_to_html("<script>alert(1)</script> [x](javascript:alert(1))");
        assert!(!html.contains("<script>"));
        assert!(html.contains(r##"href="#""##));
    }

    #[test]
    fn paragraphs_split_on_blank_lines() {
        assert_eq!(
            markdown_to_html("one\ntwo\n\nthree\n1. first\n2. second"),
            "<p>one two</p><p>three</p><ul><li>first</li><li>second</li></ul>"
        );
    }

    #[test]
    fn guide_fixture() {
        let md = std::fs::read_to_string("tests/fixtures/guide.md").unwrap();
        let sections = parse_markdown_into_sections(&md, "guide.md");
        assert_eq!(sections[0].content, vec![ContentBlock::text("<h1>Getting Started</h1>")]);
        assert!(sections.iter().any(|s| s.name == "Installation"));
        assert!(sections
            .iter()
            .flat_map(|s| &s.content)
            .any(|b| b.value().contains(r#"target="_blank""#)));
    }
}
