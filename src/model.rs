use serde::{Deserialize, Serialize};

/// One editable block of the generated site, rendered in sequence order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    pub icon: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_header: Option<bool>,
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    #[serde(rename_all = "camelCase")]
    Text {
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        allow_html: Option<bool>,
    },
    Image {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Html {
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        allow_raw_html: Option<bool>,
    },
}

impl Section {
    /// The `<h1>` title section every parser emits first. `title` must already be escaped.
    pub fn header(icon: &str, title: &str) -> Self {
        Section {
            id: "header".to_string(),
            icon: icon.to_string(),
            name: "Header".to_string(),
            is_header: Some(true),
            content: vec![ContentBlock::text(format!("<h1>{}</h1>", title))],
        }
    }

    pub fn new(id: impl Into<String>, icon: &str, name: impl Into<String>) -> Self {
        Section {
            id: id.into(),
            icon: icon.to_string(),
            name: name.into(),
            is_header: Some(false),
            content: Vec::new(),
        }
    }

    pub fn with_block(mut self, block: ContentBlock) -> Self {
        self.content.push(block);
        self
    }

    pub fn is_header(&self) -> bool {
        self.is_header.unwrap_or(false)
    }
}

impl ContentBlock {
    pub fn text(value: impl Into<String>) -> Self {
        ContentBlock::Text {
            value: value.into(),
            allow_html: None,
        }
    }

    pub fn html(value: impl Into<String>) -> Self {
        ContentBlock::Html {
            value: value.into(),
            allow_raw_html: Some(true),
        }
    }

    pub fn image(url: impl Into<String>, caption: Option<String>) -> Self {
        ContentBlock::Image {
            url: url.into(),
            caption,
        }
    }

    /// Markup or URL carried by the block, whatever its kind.
    pub fn value(&self) -> &str {
        match self {
            ContentBlock::Text { value, .. } | ContentBlock::Html { value, .. } => value,
            ContentBlock::Image { url, .. } => url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_in_site_shape() {
        let section = Section::header("📄", "Report");
        let json = serde_json::to_value(&section).unwrap();
        assert_eq!(json["id"], "header");
        assert_eq!(json["isHeader"], true);
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][0]["value"], "<h1>Report</h1>");
        assert!(json["content"][0].get("allowHtml").is_none());
    }

    #[test]
    fn html_block_uses_camel_case_flag() {
        let json = serde_json::to_value(ContentBlock::html("<p>x</p>")).unwrap();
        assert_eq!(json["type"], "html");
        assert_eq!(json["allowRawHtml"], true);
    }

    #[test]
    fn deserializes_image_block() {
        let block: ContentBlock =
            serde_json::from_str(r#"{"type":"image","url":"data:x","caption":"c"}"#).unwrap();
        assert_eq!(block, ContentBlock::image("data:x", Some("c".into())));
    }
}
