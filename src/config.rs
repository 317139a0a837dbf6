use std::time::Duration;

pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;
pub const READ_TIMEOUT_SECS: u64 = 30;

const MIN_ALPHA_RATIO: f64 = 0.5;
const MIN_TEXT_LEN: usize = 100;
const RENDER_SCALE: f32 = 2.0;
const LINE_BREAK_THRESHOLD: f32 = 5.0;
const OCR_LANGUAGE: &str = "eng";

/// Limits enforced by the file dispatcher.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub max_file_size: u64,
    pub read_timeout: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        ProcessorConfig {
            max_file_size: MAX_FILE_SIZE,
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
        }
    }
}

/// Knobs of the PDF/OCR worker pipeline.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Below this share of ASCII letters among non-whitespace chars the text layer is treated as garbage.
    pub min_alpha_ratio: f64,
    /// Extracted text shorter than this (after trimming) triggers OCR.
    pub min_text_len: usize,
    pub render_scale: f32,
    /// Baseline jump between text runs that starts a new line.
    pub line_break_threshold: f32,
    pub ocr_language: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            min_alpha_ratio: MIN_ALPHA_RATIO,
            min_text_len: MIN_TEXT_LEN,
            render_scale: RENDER_SCALE,
            line_break_threshold: LINE_BREAK_THRESHOLD,
            ocr_language: OCR_LANGUAGE.to_string(),
        }
    }
}
