use anyhow::{anyhow, Context, Result};
use lopdf::content::Content;
use lopdf::{Document, Object, ObjectId};

/// A string shown by the text layer at a given baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub y: f32,
}

impl TextRun {
    pub fn new(text: impl Into<String>, y: f32) -> Self {
        TextRun { text: text.into(), y }
    }
}

pub trait PdfTextLayer: Send + Sync {
    fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }

    fn open(&self, data: &[u8]) -> Result<Box<dyn PdfDocument>>;
}

pub trait PdfDocument: Send {
    fn page_count(&self) -> usize;

    fn text_runs(&self, page: usize) -> Result<Vec<TextRun>>;
}

/// Join runs into page text, breaking lines when the baseline jumps past `threshold`.
pub fn join_runs(runs: &[TextRun], threshold: f32) -> String {
    let mut text = String::new();
    let mut last_y: Option<f32> = None;
    for run in runs {
        if let Some(y) = last_y {
            if (run.y - y).abs() > threshold {
                text.push('\n');
            } else if !text.ends_with(char::is_whitespace)
                && !run.text.starts_with(char::is_whitespace)
            {
                text.push(' ');
            }
        }
        text.push_str(&run.text);
        last_y = Some(run.y);
    }
    text
}

/// Text layer read straight from page content streams.
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfTextLayer;

impl PdfTextLayer for LopdfTextLayer {
    fn open(&self, data: &[u8]) -> Result<Box<dyn PdfDocument>> {
        let doc = Document::load_mem(data).context("failed to parse PDF")?;
        let pages = doc.get_pages().into_values().collect();
        Ok(Box::new(LopdfDocument { doc, pages }))
    }
}

struct LopdfDocument {
    doc: Document,
    pages: Vec<ObjectId>,
}

impl PdfDocument for LopdfDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn text_runs(&self, page: usize) -> Result<Vec<TextRun>> {
        let id = *self
            .pages
            .get(page)
            .ok_or_else(|| anyhow!("page {} out of range", page + 1))?;
        let bytes = self
            .doc
            .get_page_content(id)
            .with_context(|| format!("failed to read content of page {}", page + 1))?;
        let content = Content::decode(&bytes)
            .with_context(|| format!("failed to decode content of page {}", page + 1))?;

        let mut state = TextState::default();
        for op in &content.operations {
            state.apply(&op.operator, &op.operands);
        }
        Ok(state.runs)
    }
}

/// Minimal text-positioning state: only the vertical component matters here.
#[derive(Default)]
struct TextState {
    line_y: f32,
    leading: f32,
    runs: Vec<TextRun>,
}

impl TextState {
    fn apply(&mut self, operator: &str, operands: &[Object]) {
        match operator {
            "BT" => self.line_y = 0.0,
            "Tm" => {
                if let Some(f) = operands.get(5).and_then(number) {
                    self.line_y = f;
                }
            }
            "Td" => {
                if let Some(ty) = operands.get(1).and_then(number) {
                    self.line_y += ty;
                }
            }
            "TD" => {
                if let Some(ty) = operands.get(1).and_then(number) {
                    self.leading = -ty;
                    self.line_y += ty;
                }
            }
            "TL" => {
                if let Some(l) = operands.first().and_then(number) {
                    self.leading = l;
                }
            }
            "T*" => self.line_y -= self.leading,
            "Tj" => self.show(operands.first()),
            "'" => {
                self.line_y -= self.leading;
                self.show(operands.first());
            }
            "\"" => {
                self.line_y -= self.leading;
                self.show(operands.get(2));
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    let mut text = String::new();
                    for item in items {
                        match item {
                            Object::String(bytes, _) => text.push_str(&decode_pdf_string(bytes)),
                            // Large negative kerning is a word gap.
                            other if number(other).is_some_and(|n| n < -200.0) => text.push(' '),
                            _ => {}
                        }
                    }
                    self.push(text);
                }
            }
            _ => {}
        }
    }

    fn show(&mut self, operand: Option<&Object>) {
        if let Some(Object::String(bytes, _)) = operand {
            let text = decode_pdf_string(bytes);
            self.push(text);
        }
    }

    fn push(&mut self, text: String) {
        if !text.is_empty() {
            self.runs.push(TextRun { text, y: self.line_y });
        }
    }
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

/// UTF-16BE when BOM-prefixed, otherwise one char per byte.
fn decode_pdf_string(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|&b| b as char).collect()
}
