use std::sync::LazyLock;

use regex::Regex;

static BULLET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*[-•*]\s*(.+)").unwrap());
static ORDERED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)[)\.\-]\s*(.+)").unwrap());
static NON_SLUG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

pub const DOCUMENT_ICON: &str = "📄";

/// Replace the five HTML-significant characters with entities.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Unordered,
    Ordered,
}

enum LineKind<'a> {
    Blank,
    Item(ListKind, &'a str),
    Plain(&'a str),
}

fn classify(line: &str) -> LineKind<'_> {
    if line.trim().is_empty() {
        return LineKind::Blank;
    }
    if let Some(caps) = BULLET_RE.captures(line) {
        return LineKind::Item(ListKind::Unordered, caps.get(1).map_or("", |m| m.as_str()));
    }
    if let Some(caps) = ORDERED_RE.captures(line) {
        return LineKind::Item(ListKind::Ordered, caps.get(2).map_or("", |m| m.as_str()));
    }
    LineKind::Plain(line)
}

/// Group lines into `<p>`, `<ul>` and `<ol>` blocks, escaping all text.
pub fn format_content_lines<S: AsRef<str>>(lines: &[S]) -> String {
    let mut html = String::new();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut list: Option<(ListKind, Vec<&str>)> = None;

    for line in lines {
        match classify(line.as_ref()) {
            LineKind::Blank => {
                flush_list(&mut list, &mut html);
                flush_paragraph(&mut paragraph, &mut html);
            }
            LineKind::Item(kind, text) => {
                flush_paragraph(&mut paragraph, &mut html);
                if list.as_ref().is_some_and(|(k, _)| *k != kind) {
                    flush_list(&mut list, &mut html);
                }
                list.get_or_insert_with(|| (kind, Vec::new())).1.push(text.trim());
            }
            LineKind::Plain(text) => {
                flush_list(&mut list, &mut html);
                paragraph.push(text.trim());
            }
        }
    }
    flush_list(&mut list, &mut html);
    flush_paragraph(&mut paragraph, &mut html);
    html
}

fn flush_list(list: &mut Option<(ListKind, Vec<&str>)>, html: &mut String) {
    let Some((kind, items)) = list.take() else {
        return;
    };
    let tag = match kind {
        ListKind::Unordered => "ul",
        ListKind::Ordered => "ol",
    };
    html.push_str(&format!("<{}>", tag));
    for item in items {
        html.push_str(&format!("<li>{}</li>", escape_html(item)));
    }
    html.push_str(&format!("</{}>", tag));
}

fn flush_paragraph(paragraph: &mut Vec<&str>, html: &mut String) {
    if paragraph.is_empty() {
        return;
    }
    let joined = paragraph.join(" ");
    paragraph.clear();
    let escaped = escape_html(&joined);
    if is_shouting(&joined) {
        html.push_str(&format!("<p><strong>{}</strong></p>", escaped));
    } else {
        html.push_str(&format!("<p>{}</p>", escaped));
    }
}

/// Short, mostly-uppercase runs read as headings.
fn is_shouting(text: &str) -> bool {
    let letters = text.chars().filter(|c| c.is_alphabetic()).count();
    if letters == 0 || text.chars().count() >= 200 {
        return false;
    }
    let upper = text.chars().filter(|c| c.is_uppercase()).count();
    upper as f64 / letters as f64 > 0.7
}

/// Icon for a heading, chosen by the first keyword it contains.
pub fn icon_for_heading(heading: &str) -> &'static str {
    const ICONS: &[(&str, &str)] = &[
        ("introduction", "📖"),
        ("overview", "📖"),
        ("abstract", "📝"),
        ("background", "🏛️"),
        ("method", "🔬"),
        ("approach", "🔬"),
        ("result", "📊"),
        ("finding", "📊"),
        ("analysis", "📈"),
        ("evaluation", "📈"),
        ("discussion", "💬"),
        ("conclusion", "✅"),
        ("summary", "✅"),
        ("recommendation", "💡"),
        ("goal", "🎯"),
        ("objective", "🎯"),
        ("reference", "📚"),
        ("appendix", "📎"),
    ];
    let lower = heading.to_lowercase();
    ICONS
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map_or(DOCUMENT_ICON, |&(_, icon)| icon)
}

pub fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn slugify(s: &str) -> String {
    NON_SLUG_RE
        .replace_all(&s.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

/// Slug plus a millisecond timestamp and random suffix, unique across sections.
pub fn unique_section_id(heading: &str) -> String {
    let slug = slugify(heading);
    let slug = if slug.is_empty() { "section".to_string() } else { slug };
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{}",
        slug,
        chrono::Utc::now().timestamp_millis(),
        &suffix[..7]
    )
}

pub fn strip_extension(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(idx) if idx > 0 => &file_name[..idx],
        _ => file_name,
    }
}

/// Truncate to `max` chars, appending an ellipsis when something was cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_script_tags() {
        assert_eq!(escape_html("<script>"), "&lt;script&gt;");
        assert_eq!(escape_html(r#"a & "b" 'c'"#), "a &amp; &quot;b&quot; &#39;c&#39;");
    }

    #[test]
    fn bullet_run_is_single_list() {
        assert_eq!(format_content_lines(&["- a", "- b"]), "<ul><li>a</li><li>b</li></ul>");
    }

    #[test]
    fn shouting_paragraph_is_bold() {
        assert_eq!(
            format_content_lines(&["ALL CAPS SHOUT"]),
            "<p><strong>ALL CAPS SHOUT</strong></p>"
        );
    }

    #[test]
    fn long_uppercase_paragraph_is_not_bold() {
        let line = "A".repeat(250);
        assert_eq!(format_content_lines(&[line.as_str()]), format!("<p>{}</p>", line));
    }

    #[test]
    fn blank_lines_split_paragraphs() {
        let html = format_content_lines(&["first line", "continues", "", "second"]);
        assert_eq!(html, "<p>first line continues</p><p>second</p>");
    }

    #[test]
    fn ordered_list_and_kind_switch() {
        let html = format_content_lines(&["1) one", "2. two", "• dot", "tail"]);
        assert_eq!(
            html,
            "<ol><li>one</li><li>two</li></ol><ul><li>dot</li></ul><p>tail</p>"
        );
    }

    #[test]
    fn list_items_are_escaped() {
        assert_eq!(
            format_content_lines(&["* <b>x</b>"]),
            "<ul><li>&lt;b&gt;x&lt;/b&gt;</li></ul>"
        );
    }

    #[test]
    fn icon_lookup() {
        assert_eq!(icon_for_heading("Introduction"), "📖");
        assert_eq!(icon_for_heading("key findings"), "📊");
        assert_eq!(icon_for_heading("Summary"), "✅");
        assert_eq!(icon_for_heading("Something else"), DOCUMENT_ICON);
    }

    #[test]
    fn helpers() {
        assert_eq!(title_case("related WORK"), "Related Work");
        assert_eq!(slugify("Future Work: Ideas!"), "future-work-ideas");
        assert_eq!(strip_extension("report.final.txt"), "report.final");
        assert_eq!(strip_extension(".env"), ".env");
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("abc", 3), "abc");
    }

    #[test]
    fn section_ids_differ() {
        let a = unique_section_id("Results");
        let b = unique_section_id("Results");
        assert!(a.starts_with("results-"));
        assert_ne!(a, b);
    }
}
