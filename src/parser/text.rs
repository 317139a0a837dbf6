use std::sync::LazyLock;

use regex::Regex;

use super::format::{
    escape_html, format_content_lines, icon_for_heading, strip_extension, title_case,
    unique_section_id, DOCUMENT_ICON,
};
use crate::model::{ContentBlock, Section};

static NUMBERED_HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.?\s+(.+)").unwrap());

const KNOWN_HEADINGS: &[&str] = &[
    "abstract",
    "introduction",
    "background",
    "methods",
    "methodology",
    "results",
    "discussion",
    "conclusion",
    "references",
    "acknowledgments",
    "summary",
    "objectives",
    "materials",
    "analysis",
    "findings",
    "recommendations",
    "future work",
    "limitations",
    "appendix",
    "overview",
    "approach",
    "implementation",
    "evaluation",
    "related work",
    "executive summary",
    "business objectives",
    "scope",
    "goals",
    "purpose",
];

/// Heading rules, tried top to bottom; the first match wins.
const HEADING_RULES: &[fn(&str) -> Option<&str>] = &[numbered_heading, known_heading];

fn numbered_heading(line: &str) -> Option<&str> {
    NUMBERED_HEADING_RE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn known_heading(line: &str) -> Option<&str> {
    let lower = line.to_lowercase();
    KNOWN_HEADINGS
        .iter()
        .any(|known| lower.starts_with(known))
        .then_some(line)
}

fn detect_heading(line: &str) -> Option<&str> {
    HEADING_RULES.iter().find_map(|rule| rule(line))
}

struct PendingSection<'a> {
    section: Section,
    lines: Vec<&'a str>,
    /// Lines before the first heading; dropped when they hold nothing.
    implicit: bool,
}

impl<'a> PendingSection<'a> {
    fn preamble() -> Self {
        PendingSection {
            section: Section::new("content", DOCUMENT_ICON, "Content"),
            lines: Vec::new(),
            implicit: true,
        }
    }

    fn from_heading(heading: &str) -> Self {
        let cleaned = heading
            .trim()
            .trim_end_matches(|c: char| c == ':' || c == '.' || c.is_whitespace());
        PendingSection {
            section: Section::new(
                unique_section_id(cleaned),
                icon_for_heading(cleaned),
                title_case(cleaned),
            ),
            lines: Vec::new(),
            implicit: false,
        }
    }

    fn has_text(&self) -> bool {
        self.lines.iter().any(|l| !l.trim().is_empty())
    }

    fn finish(mut self, sections: &mut Vec<Section>) {
        if self.implicit && !self.has_text() {
            return;
        }
        if self.has_text() {
            self.section
                .content
                .push(ContentBlock::text(format_content_lines(&self.lines)));
        }
        sections.push(self.section);
    }
}

/// Split plain text into a header plus one section per detected heading.
pub fn parse_text_into_sections(text: &str, file_name: &str) -> Vec<Section> {
    let title = escape_html(strip_extension(file_name));
    let mut sections = vec![Section::header(DOCUMENT_ICON, &title)];
    let mut current = PendingSection::preamble();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            current.lines.push(line);
            continue;
        }
        match detect_heading(trimmed) {
            Some(heading) => {
                let next = PendingSection::from_heading(heading);
                std::mem::replace(&mut current, next).finish(&mut sections);
            }
            None => current.lines.push(line),
        }
    }
    current.finish(&mut sections);

    sections
}
