use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use super::format::{escape_html, strip_extension};
use crate::model::{ContentBlock, Section};

const IMAGE_ICON: &str = "🖼️";

pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
}

pub fn to_data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// Header, the image itself, and a description placeholder.
pub fn create_image_sections(data_url: &str, file_name: &str) -> Vec<Section> {
    let title = escape_html(strip_extension(file_name));
    vec![
        Section::header(IMAGE_ICON, &title),
        Section::new("image", IMAGE_ICON, "Image").with_block(ContentBlock::image(
            data_url,
            Some(format!("Uploaded image: {}", escape_html(file_name))),
        )),
        Section::new("description", "📝", "Description").with_block(ContentBlock::text(
            "<p>Add a description of this image here.</p>",
        )),
    ]
}

/// Image skeleton with OCR-derived sections in place of the description placeholder.
pub fn merge_ocr_sections(data_url: &str, file_name: &str, ocr: Vec<Section>) -> Vec<Section> {
    let mut sections = create_image_sections(data_url, file_name);
    let recognized: Vec<Section> = ocr.into_iter().filter(|s| !s.is_header()).collect();
    if !recognized.is_empty() {
        sections.truncate(2);
        sections.extend(recognized);
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::text::parse_text_into_sections;

    #[test]
    fn skeleton_has_three_sections() {
        let url = to_data_url("image/png", &[1, 2, 3]);
        assert_eq!(url, "data:image/png;base64,AQID");
        let sections = create_image_sections(&url, "photo.png");
        assert_eq!(sections.len(), 3);
        assert!(sections[0].is_header());
        assert_eq!(sections[0].content, vec![ContentBlock::text("<h1>photo</h1>")]);
        assert!(matches!(&sections[1].content[0], ContentBlock::Image { url: u, .. } if *u == url));
        assert_eq!(sections[2].id, "description");
    }

    #[test]
    fn ocr_sections_replace_placeholder() {
        let ocr = parse_text_into_sections("Results\nRevenue grew.", "scan.png");
        let sections = merge_ocr_sections("data:x", "scan.png", ocr);
        let names: Vec<_> = sections.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Header", "Image", "Results"]);
    }

    #[test]
    fn empty_ocr_keeps_placeholder() {
        let ocr = parse_text_into_sections("", "scan.png");
        assert_eq!(merge_ocr_sections("data:x", "scan.png", ocr).len(), 3);
    }
}
