//! Converts uploaded documents into ordered website sections.

pub mod config;
pub mod error;
pub mod model;
pub mod parser;
pub mod processor;
pub mod worker;

pub use config::{ProcessorConfig, WorkerConfig};
pub use error::{ErrorKind, ProcessingError, Severity};
pub use model::{ContentBlock, Section};
pub use processor::{FileProcessor, UploadedFile};
