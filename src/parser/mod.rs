pub mod format;
pub mod html;
pub mod image;
pub mod markdown;
pub mod office;
pub mod text;

use crate::error::ProcessingError;
use crate::model::Section;

/// Input formats, keyed by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Pptx,
    Docx,
    Text,
    Markdown,
    Html,
    Image,
}

impl FileKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "pdf" => Some(FileKind::Pdf),
            "pptx" => Some(FileKind::Pptx),
            "docx" => Some(FileKind::Docx),
            "txt" => Some(FileKind::Text),
            "md" => Some(FileKind::Markdown),
            "html" | "htm" => Some(FileKind::Html),
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "svg" | "tiff" => Some(FileKind::Image),
            _ => None,
        }
    }

    pub fn from_file_name(file_name: &str) -> Result<Self, ProcessingError> {
        let ext = extension(file_name);
        Self::from_extension(&ext).ok_or_else(|| ProcessingError::unsupported(&ext))
    }
}

/// Lowercased extension, empty when there is none.
pub fn extension(file_name: &str) -> String {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default()
}

/// Synchronous conversion of already-read bytes. Never blocks on I/O.
pub fn parse_document(file_name: &str, bytes: &[u8]) -> Result<Vec<Section>, ProcessingError> {
    let kind = FileKind::from_file_name(file_name)?;
    let sections = match kind {
        FileKind::Text => text::parse_text_into_sections(&String::from_utf8_lossy(bytes), file_name),
        FileKind::Markdown => {
            markdown::parse_markdown_into_sections(&String::from_utf8_lossy(bytes), file_name)
        }
        FileKind::Html => html::parse_html_into_sections(&String::from_utf8_lossy(bytes), file_name),
        FileKind::Image => {
            let mime = image::mime_for_extension(&extension(file_name));
            image::create_image_sections(&image::to_data_url(mime, bytes), file_name)
        }
        FileKind::Docx => office::parse_docx(bytes, file_name)
            .map_err(|e| ProcessingError::parse(format!("{:#}", e)))?,
        FileKind::Pptx => office::parse_pptx(bytes, file_name)
            .map_err(|e| ProcessingError::parse(format!("{:#}", e)))?,
        FileKind::Pdf => office::placeholder_sections(file_name, "PDF"),
    };
    Ok(sections)
}
