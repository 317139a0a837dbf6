use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Failure categories of the conversion pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    FileTooLarge,
    UnsupportedFileType,
    ReadTimeout,
    ReadFailure,
    ParseFailure,
    WorkerDependencyLoadFailure,
    WorkerProcessingFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::FileTooLarge => "FILE_TOO_LARGE",
            ErrorKind::UnsupportedFileType => "UNSUPPORTED_FILE_TYPE",
            ErrorKind::ReadTimeout => "READ_TIMEOUT",
            ErrorKind::ReadFailure => "READ_FAILURE",
            ErrorKind::ParseFailure => "PARSE_FAILURE",
            ErrorKind::WorkerDependencyLoadFailure => "WORKER_DEPENDENCY_LOAD_FAILURE",
            ErrorKind::WorkerProcessingFailure => "WORKER_PROCESSING_FAILURE",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            ErrorKind::FileTooLarge | ErrorKind::UnsupportedFileType => Severity::Warning,
            ErrorKind::WorkerDependencyLoadFailure => Severity::Critical,
            _ => Severity::Error,
        }
    }

    /// Message safe to show to the person who uploaded the file.
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::FileTooLarge => "This file is too large. Please upload a file under 50MB.",
            ErrorKind::UnsupportedFileType => "This file type is not supported yet.",
            ErrorKind::ReadTimeout => "Reading the file took too long. Please try again.",
            ErrorKind::ReadFailure => "The file could not be read.",
            ErrorKind::ParseFailure => "We couldn't understand the contents of this file.",
            ErrorKind::WorkerDependencyLoadFailure => {
                "Document processing tools are unavailable right now."
            }
            ErrorKind::WorkerProcessingFailure => "Processing this document failed.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct ProcessingError {
    pub kind: ErrorKind,
    pub message: String,
    pub context: BTreeMap<String, String>,
}

impl ProcessingError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        ProcessingError {
            kind,
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    pub fn with_context(mut self, key: &str, value: impl ToString) -> Self {
        self.context.insert(key.to_string(), value.to_string());
        self
    }

    pub fn file_too_large(size: u64, limit: u64) -> Self {
        Self::new(
            ErrorKind::FileTooLarge,
            format!("file is {} bytes, limit is {} bytes", size, limit),
        )
        .with_context("size", size)
        .with_context("limit", limit)
    }

    pub fn unsupported(extension: &str) -> Self {
        Self::new(
            ErrorKind::UnsupportedFileType,
            format!("unsupported file type: .{}", extension),
        )
        .with_context("extension", extension)
    }

    pub fn parse(err: impl fmt::Display) -> Self {
        Self::new(ErrorKind::ParseFailure, err.to_string())
    }
}
