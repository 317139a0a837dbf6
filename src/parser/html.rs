use std::sync::LazyLock;

use scraper::{ElementRef, Html, Node, Selector};
use tracing::debug;

use super::format::{escape_html, icon_for_heading, strip_extension, truncate, DOCUMENT_ICON};
use crate::model::{ContentBlock, Section};

static TITLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static H1_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").unwrap());
static BODY_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body").unwrap());
static SEMANTIC_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("header, main, section, article, aside, nav, footer").unwrap()
});
static HEADING_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1, h2, h3, h4, h5, h6").unwrap());

const NAME_LIMIT: usize = 30;

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];
const EMBED_TAGS: &[&str] = &["object", "embed", "iframe", "form", "input", "button"];
const HTML_NS: &str = "http://www.w3.org/1999/xhtml";

/// Parse an HTML document into a header plus semantic, heading, or whole-body sections.
pub fn parse_html_into_sections(html_content: &str, file_name: &str) -> Vec<Section> {
    let doc = Html::parse_document(html_content);
    let title = document_title(&doc, file_name);
    let mut sections = vec![Section::header(DOCUMENT_ICON, &escape_html(&title))];

    let found = semantic_sections(&doc)
        .or_else(|| heading_sections(&doc, &title))
        .or_else(|| body_section(&doc))
        .unwrap_or_default();
    debug!("{}: {} content sections", file_name, found.len());
    sections.extend(found);

    if sections.len() == 1 {
        let markup = doc
            .select(&BODY_SEL)
            .next()
            .map(|body| Sanitizer::STRICT.inner(body))
            .unwrap_or_default();
        sections.push(
            Section::new("content", DOCUMENT_ICON, "Content").with_block(ContentBlock::html(markup)),
        );
    }
    sections
}

fn text_of(el: ElementRef) -> String {
    el.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `<title>`, then the first `<h1>`, then the file name.
fn document_title(doc: &Html, file_name: &str) -> String {
    doc.select(&TITLE_SEL)
        .chain(doc.select(&H1_SEL).take(1))
        .map(text_of)
        .find(|t| !t.is_empty())
        .unwrap_or_else(|| strip_extension(file_name).to_string())
}

fn tag_label(tag: &str) -> (&'static str, &'static str) {
    match tag {
        "header" => ("🏠", "Header"),
        "main" => ("📄", "Main Content"),
        "section" => ("📝", "Section"),
        "article" => ("📰", "Article"),
        "aside" => ("📌", "Sidebar"),
        "nav" => ("🧭", "Navigation"),
        "footer" => ("📧", "Footer"),
        _ => (DOCUMENT_ICON, "Content"),
    }
}

fn semantic_sections(doc: &Html) -> Option<Vec<Section>> {
    let sections: Vec<Section> = doc
        .select(&SEMANTIC_SEL)
        .filter(|el| !text_of(*el).is_empty())
        .enumerate()
        .map(|(i, el)| {
            let tag = el.value().name();
            let (icon, name) = tag_label(tag);
            Section::new(format!("{}-{}", tag, i + 1), icon, name)
                .with_block(ContentBlock::html(Sanitizer::DEFAULT.outer(el)))
        })
        .collect();
    (!sections.is_empty()).then_some(sections)
}

fn heading_level(el: ElementRef) -> Option<u8> {
    let name = el.value().name();
    name.strip_prefix('h')
        .and_then(|n| n.parse::<u8>().ok())
        .filter(|n| (1..=6).contains(n))
}

fn heading_sections(doc: &Html, title: &str) -> Option<Vec<Section>> {
    let headings: Vec<ElementRef> = doc.select(&HEADING_SEL).collect();
    if headings.is_empty() {
        return None;
    }

    let mut sections = Vec::new();
    for (i, heading) in headings.iter().enumerate() {
        let Some(level) = heading_level(*heading) else {
            continue;
        };
        let text = text_of(*heading);
        if i == 0 && level == 1 && text == title {
            continue;
        }

        let mut markup = String::new();
        for sibling in heading.next_siblings() {
            match sibling.value() {
                Node::Element(_) => {
                    let Some(el) = ElementRef::wrap(sibling) else {
                        continue;
                    };
                    if heading_level(el).is_some_and(|l| l <= level) {
                        break;
                    }
                    Sanitizer::DEFAULT.element(el, &mut markup);
                }
                Node::Text(t) if !t.trim().is_empty() => markup.push_str(&escape_html(t)),
                _ => {}
            }
        }

        let mut section = Section::new(
            format!("heading-{}", i + 1),
            icon_for_heading(&text),
            truncate(&text, NAME_LIMIT),
        );
        if !markup.trim().is_empty() {
            section.content.push(ContentBlock::html(markup));
        }
        sections.push(section);
    }
    Some(sections)
}

fn body_section(doc: &Html) -> Option<Vec<Section>> {
    let body = doc.select(&BODY_SEL).next()?;
    if text_of(body).is_empty() {
        return None;
    }
    Some(vec![Section::new("content", DOCUMENT_ICON, "Content")
        .with_block(ContentBlock::html(Sanitizer::DEFAULT.inner(body)))])
}

/// Serializes a subtree without scripts or inline event handlers.
#[derive(Debug, Clone, Copy)]
struct Sanitizer {
    /// Also drop embedded/interactive elements and `javascript:` links.
    strict: bool,
}

impl Sanitizer {
    const DEFAULT: Sanitizer = Sanitizer { strict: false };
    const STRICT: Sanitizer = Sanitizer { strict: true };

    fn outer(self, el: ElementRef) -> String {
        let mut out = String::new();
        self.element(el, &mut out);
        out
    }

    fn inner(self, el: ElementRef) -> String {
        let mut out = String::new();
        self.children(el, &mut out);
        out
    }

    fn element(self, el: ElementRef, out: &mut String) {
        let name = el.value().name();
        if name == "script" || (self.strict && EMBED_TAGS.contains(&name)) {
            return;
        }

        out.push('<');
        out.push_str(name);
        for (attr, value) in el.value().attrs.iter() {
            let local: &str = &attr.local;
            if local.to_ascii_lowercase().starts_with("on") {
                continue;
            }
            let value: &str = value;
            let value = if self.strict
                && local.eq_ignore_ascii_case("href")
                && is_javascript_uri(value)
            {
                "#"
            } else {
                value
            };
            let value = escape_html(value);
            match attr.prefix.as_deref() {
                Some(prefix) => out.push_str(&format!(" {}:{}=\"{}\"", prefix, local, value)),
                None => out.push_str(&format!(" {}=\"{}\"", local, value)),
            }
        }
        out.push('>');

        if VOID_TAGS.contains(&name) {
            return;
        }
        self.children(el, out);
        out.push_str(&format!("</{}>", name));
    }

    fn children(self, el: ElementRef, out: &mut String) {
        // Only HTML <style> keeps its text literally; in SVG/MathML entities are decoded.
        let raw_text = el.value().name() == "style" && &*el.value().name.ns == HTML_NS;
        for child in el.children() {
            match child.value() {
                Node::Text(t) if raw_text => out.push_str(t),
                Node::Text(t) => out.push_str(&escape_html(t)),
                Node::Element(_) => {
                    if let Some(child_el) = ElementRef::wrap(child) {
                        self.element(child_el, out);
                    }
                }
                _ => {}
            }
        }
    }
}

fn is_javascript_uri(value: &str) -> bool {
    value
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_lowercase()
        .starts_with("javascript:")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_markup(sections: &[Section]) -> String {
        sections
            .iter()
            .flat_map(|s| &s.content)
            .map(|b| b.value().to_string())
            .collect()
    }

    #[test]
    fn heading_strategy_skips_title_h1() {
        let html = "<html><body><h1>Title</h1><h2>Intro</h2><p>Hi</p></body></html>";
        let sections = parse_html_into_sections(html, "page.html");
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].content, vec![ContentBlock::text("<h1>Title</h1>")]);
        assert_eq!(sections[1].name, "Intro");
        assert_eq!(sections[1].content, vec![ContentBlock::html("<p>Hi</p>")]);
    }

    #[test]
    fn title_element_wins_over_h1() {
        let html = "<html><head><title>Site</title></head><body><h1>Big</h1><p>x</p></body></html>";
        let sections = parse_html_into_sections(html, "page.html");
        assert_eq!(sections[0].content, vec![ContentBlock::text("<h1>Site</h1>")]);
        assert_eq!(sections[1].name, "Big");
    }

    #[test]
    fn filename_title_when_nothing_else() {
        let sections = parse_html_into_sections("<p>hello</p>", "landing.htm");
        assert_eq!(sections[0].content, vec![ContentBlock::text("<h1>landing</h1>")]);
        assert_eq!(sections[1].name, "Content");
        assert_eq!(sections[1].content, vec![ContentBlock::html("<p>hello</p>")]);
    }

    #[test]
    fn semantic_containers_win() {
        let html = "<body><header><h1>T</h1></header><main><p>Body</p></main><footer> </footer></body>";
        let sections = parse_html_into_sections(html, "x.html");
        let names: Vec<_> = sections.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Header", "Header", "Main Content"]);
        assert_eq!(sections[1].icon, "🏠");
        assert_eq!(sections[2].content, vec![ContentBlock::html("<main><p>Body</p></main>")]);
    }

    #[test]
    fn heading_content_stops_at_same_level() {
        let html = "<body><h2>A</h2><p>a</p><h3>A.1</h3><p>a1</p><h2>B</h2><p>b</p></body>";
        let sections = parse_html_into_sections(html, "x.html");
        assert_eq!(sections.len(), 4);
        assert_eq!(
            sections[1].content,
            vec![ContentBlock::html("<p>a</p><h3>A.1</h3><p>a1</p>")]
        );
        assert_eq!(sections[2].content, vec![ContentBlock::html("<p>a1</p>")]);
        assert_eq!(sections[3].content, vec![ContentBlock::html("<p>b</p>")]);
    }

    #[test]
    fn long_heading_name_gets_ellipsis() {
        let html = "<h2>An extraordinarily long heading for a section</h2><p>x</p>";
        let sections = parse_html_into_sections(html, "x.html");
        assert_eq!(sections[1].name, "An extraordinarily long headin...");
    }

    #[test]
    fn scripts_and_handlers_are_stripped() {
        let html = r#"<body><h2>Intro</h2><p onclick="x()" class="lead">Hi<script>alert(1)</script></p>
            <section><button onClick="y()">Go</button><script>alert(2)</script></section></body>"#;
        let sections = parse_html_into_sections(html, "x.html");
        let markup = all_markup(&sections);
        assert!(!markup.contains("<script"));
        assert!(!markup.contains("alert"));
        assert!(!markup.to_lowercase().contains("onclick"));
        assert!(markup.contains(r#"<button>Go</button>"#));
    }

    #[test]
    fn strict_fallback_removes_embeds_and_js_links() {
        let html = r#"<body><h1>Only</h1><iframe src="x"></iframe><a href=" javascript:evil()">l</a><form><input></form></body>"#;
        let sections = parse_html_into_sections(html, "x.html");
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[1].name, "Content");
        let markup = all_markup(&sections);
        assert!(!markup.contains("iframe"));
        assert!(!markup.contains("<form"));
        assert!(!markup.contains("javascript"));
        assert!(markup.contains(r##"<a href="#">l</a>"##));
    }

    #[test]
    fn void_elements_have_no_closing_tag() {
        let sections = parse_html_into_sections("<p>a<br>b<img src=\"i.png\"></p>", "x.html");
        assert_eq!(
            sections[1].content,
            vec![ContentBlock::html(r#"<p>a<br>b<img src="i.png"></p>"#)]
        );
    }

    #[test]
    fn foreign_style_text_is_escaped() {
        let html = "<body><h2>X</h2><svg><style>&lt;/style&gt;&lt;script&gt;alert(1)&lt;/script&gt;</style></svg></body>";
        let sections = parse_html_into_sections(html, "x.html");
        let markup = all_markup(&sections);
        assert!(!markup.contains("<script>"));
        assert!(markup.contains("&lt;script&gt;"));
    }

    #[test]
    fn html_style_text_is_kept_literally() {
        let html = "<body><h2>X</h2><style>p > a { color: red }</style></body>";
        let sections = parse_html_into_sections(html, "x.html");
        assert_eq!(
            sections[1].content,
            vec![ContentBlock::html("<style>p > a { color: red }</style>")]
        );
    }

    #[test]
    fn namespaced_attributes_keep_prefix() {
        let html = r#"<body><h2>Logo</h2><svg><a xlink:href="/home">home</a></svg></body>"#;
        let sections = parse_html_into_sections(html, "x.html");
        let markup = all_markup(&sections);
        assert!(markup.contains(r#"xlink:href="/home""#), "{}", markup);
    }

    #[test]
    fn landing_fixture() {
        let html = std::fs::read_to_string("tests/fixtures/landing.html").unwrap();
        let sections = parse_html_into_sections(&html, "landing.html");
        assert_eq!(sections[0].content, vec![ContentBlock::text("<h1>Acme Widgets</h1>")]);
        assert!(sections.iter().skip(1).all(|s| !s.is_header()));
        let markup = all_markup(&sections);
        assert!(!markup.contains("<script"));
        assert!(!markup.contains("onload"));
    }
}
