use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::ProcessorConfig;
use crate::error::{ErrorKind, ProcessingError};
use crate::model::{ContentBlock, Section};
use crate::parser::format::{escape_html, strip_extension, DOCUMENT_ICON};
use crate::parser::image::merge_ocr_sections;
use crate::parser::{parse_document, FileKind};
use crate::worker::client::{WorkerOutcome, WorkerPool};
use crate::worker::protocol::{DocumentType, ProgressUpdate};

enum FileSource {
    Bytes(Vec<u8>),
    Path(PathBuf),
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

/// A file handed to the dispatcher: its name, declared size, and where to read it from.
pub struct UploadedFile {
    pub name: String,
    pub size: u64,
    source: FileSource,
}

impl fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedFile")
            .field("name", &self.name)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl UploadedFile {
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, ProcessingError> {
        let path = path.as_ref();
        let meta = tokio::fs::metadata(path).await.map_err(|e| {
            ProcessingError::new(ErrorKind::ReadFailure, e.to_string())
                .with_context("path", path.display())
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(UploadedFile {
            name,
            size: meta.len(),
            source: FileSource::Path(path.to_path_buf()),
        })
    }

    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        UploadedFile {
            name: name.into(),
            size: bytes.len() as u64,
            source: FileSource::Bytes(bytes),
        }
    }

    pub fn from_reader(
        name: impl Into<String>,
        size: u64,
        reader: Box<dyn AsyncRead + Send + Unpin>,
    ) -> Self {
        UploadedFile {
            name: name.into(),
            size,
            source: FileSource::Reader(reader),
        }
    }
}

/// Routes uploads to the right parser, optionally through a pool of document workers.
pub struct FileProcessor {
    config: ProcessorConfig,
    workers: Option<Arc<WorkerPool>>,
}

impl FileProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        FileProcessor {
            config,
            workers: None,
        }
    }

    pub fn with_workers(mut self, workers: Arc<WorkerPool>) -> Self {
        self.workers = Some(workers);
        self
    }

    pub async fn process_file(&self, file: UploadedFile) -> Result<Vec<Section>, ProcessingError> {
        self.process_file_with_progress(file, None).await
    }

    /// Only an oversized file is an `Err`, whether its declared size or the bytes actually
    /// read exceed the limit; every other failure yields fallback sections.
    pub async fn process_file_with_progress(
        &self,
        file: UploadedFile,
        progress: Option<mpsc::UnboundedSender<ProgressUpdate>>,
    ) -> Result<Vec<Section>, ProcessingError> {
        if file.size > self.config.max_file_size {
            let err = ProcessingError::file_too_large(file.size, self.config.max_file_size)
                .with_context("file_name", &file.name);
            warn!("rejecting {}: {}", file.name, err);
            return Err(err);
        }

        let name = file.name.clone();
        match self.convert(file, progress).await {
            Ok(sections) => {
                info!("{}: {} sections", name, sections.len());
                Ok(sections)
            }
            Err(err) if err.kind == ErrorKind::FileTooLarge => {
                warn!("rejecting {}: {}", name, err);
                Err(err)
            }
            Err(err) => {
                log_failure(&name, &err);
                Ok(fallback_sections(&name))
            }
        }
    }

    async fn convert(
        &self,
        file: UploadedFile,
        progress: Option<mpsc::UnboundedSender<ProgressUpdate>>,
    ) -> Result<Vec<Section>, ProcessingError> {
        let kind = FileKind::from_file_name(&file.name)?;
        let bytes = read_with_timeout(
            file.source,
            self.config.read_timeout,
            self.config.max_file_size,
        )
        .await
        .map_err(|e| e.with_context("file_name", &file.name))?;

        let document_type = match kind {
            FileKind::Pdf => Some(DocumentType::Pdf),
            FileKind::Image => Some(DocumentType::Image),
            _ => None,
        };
        let pool = self.workers.as_ref().filter(|pool| pool.is_available());
        if let (Some(document_type), Some(pool)) = (document_type, pool) {
            match pool
                .process(document_type, &file.name, bytes.clone(), progress)
                .await
            {
                Ok(outcome) => return Ok(outcome_sections(outcome, &file.name)),
                Err(err) => warn!(
                    "worker failed on {} ({}), using the synchronous path",
                    file.name, err
                ),
            }
        }

        parse_document(&file.name, &bytes)
    }
}

fn outcome_sections(outcome: WorkerOutcome, file_name: &str) -> Vec<Section> {
    match outcome {
        WorkerOutcome::Sections(sections) => sections,
        WorkerOutcome::Image { sections, data_url } => {
            merge_ocr_sections(&data_url, file_name, sections)
        }
    }
}

/// Synchronous conversion of bytes already in memory, with the same fallback policy.
pub fn parse_or_fallback(file_name: &str, bytes: &[u8]) -> Vec<Section> {
    parse_document(file_name, bytes).unwrap_or_else(|err| {
        log_failure(file_name, &err);
        fallback_sections(file_name)
    })
}

async fn read_source(source: FileSource, max_len: u64) -> io::Result<Vec<u8>> {
    match source {
        FileSource::Bytes(bytes) => Ok(bytes),
        FileSource::Path(path) => read_capped(tokio::fs::File::open(&path).await?, max_len).await,
        FileSource::Reader(reader) => read_capped(reader, max_len).await,
    }
}

/// Reads at most one byte past `max_len`, enough to tell an oversized input apart.
async fn read_capped<R: AsyncRead + Unpin>(reader: R, max_len: u64) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader
        .take(max_len.saturating_add(1))
        .read_to_end(&mut buf)
        .await?;
    Ok(buf)
}

/// Dropping the read future on timeout aborts the underlying read.
async fn read_with_timeout(
    source: FileSource,
    limit: Duration,
    max_len: u64,
) -> Result<Vec<u8>, ProcessingError> {
    match tokio::time::timeout(limit, read_source(source, max_len)).await {
        Ok(Ok(bytes)) if bytes.len() as u64 > max_len => Err(ProcessingError::new(
            ErrorKind::FileTooLarge,
            format!("file holds more than the {} byte limit", max_len),
        )
        .with_context("limit", max_len)),
        Ok(Ok(bytes)) => Ok(bytes),
        Ok(Err(e)) => Err(ProcessingError::new(ErrorKind::ReadFailure, e.to_string())),
        Err(_) => Err(ProcessingError::new(
            ErrorKind::ReadTimeout,
            format!("read did not finish within {:?}", limit),
        )),
    }
}

fn log_failure(file_name: &str, err: &ProcessingError) {
    error!(
        code = err.kind.code(),
        severity = %err.kind.severity(),
        user_message = err.kind.user_message(),
        file_name,
        context = ?err.context,
        "{}",
        err.message
    );
}

/// Header plus a notice that nothing could be extracted.
pub fn fallback_sections(file_name: &str) -> Vec<Section> {
    let title = escape_html(strip_extension(file_name));
    vec![
        Section::header(DOCUMENT_ICON, &title),
        Section::new("content", DOCUMENT_ICON, "Content").with_block(ContentBlock::text(format!(
            "<p>We couldn't extract text from {}. Add your content here.</p>",
            escape_html(file_name)
        ))),
    ]
}
