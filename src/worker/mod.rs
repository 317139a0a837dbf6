pub mod client;
pub mod ocr;
pub mod pdf;
pub mod protocol;

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::WorkerConfig;
use crate::parser::extension;
use crate::parser::image::{mime_for_extension, to_data_url};
use crate::parser::text::parse_text_into_sections;
use ocr::{OcrEngine, PageRasterizer, PdftoppmRasterizer, TesseractOcr};
use pdf::{join_runs, LopdfTextLayer, PdfTextLayer};
use protocol::{
    DocumentRequest, DocumentType, ProgressUpdate, Step, WorkerMessage, WorkerRequest,
};

const REQUEST_QUEUE: usize = 16;
const MESSAGE_QUEUE: usize = 64;

/// Extraction and recognition backends owned by one worker.
#[derive(Clone)]
pub struct Engines {
    pub pdf: Arc<dyn PdfTextLayer>,
    pub rasterizer: Arc<dyn PageRasterizer>,
    pub ocr: Arc<dyn OcrEngine>,
}

impl Engines {
    /// lopdf text layer, pdftoppm rendering, tesseract recognition.
    pub fn system(config: &WorkerConfig) -> Self {
        Engines {
            pdf: Arc::new(LopdfTextLayer),
            rasterizer: Arc::new(PdftoppmRasterizer),
            ocr: Arc::new(TesseractOcr::new(config.ocr_language.clone())),
        }
    }

    async fn ensure_ready(&self) -> Result<()> {
        self.pdf.ensure_ready()?;
        self.rasterizer.ensure_ready().await?;
        self.ocr.ensure_ready().await
    }
}

/// Share of ASCII letters among non-whitespace characters; 0 for blank text.
pub fn alpha_ratio(text: &str) -> f64 {
    let non_space = text.chars().filter(|c| !c.is_whitespace()).count();
    if non_space == 0 {
        return 0.0;
    }
    let alpha = text.chars().filter(|c| c.is_ascii_alphabetic()).count();
    alpha as f64 / non_space as f64
}

pub fn needs_ocr(text: &str, config: &WorkerConfig) -> bool {
    alpha_ratio(text) < config.min_alpha_ratio || text.trim().chars().count() < config.min_text_len
}

/// Channel ends the host uses to talk to a spawned worker.
pub struct WorkerHandle {
    pub requests: mpsc::Sender<WorkerRequest>,
    pub messages: mpsc::Receiver<WorkerMessage>,
}

/// Sends progress without blocking and never lets the reported value go backwards.
#[derive(Clone)]
struct ProgressReporter {
    tx: mpsc::Sender<WorkerMessage>,
    last: Arc<Mutex<f32>>,
}

impl ProgressReporter {
    fn new(tx: mpsc::Sender<WorkerMessage>) -> Self {
        ProgressReporter {
            tx,
            last: Arc::new(Mutex::new(0.0)),
        }
    }

    fn report(&self, step: Step, progress: f32, message: impl Into<String>) {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let progress = progress.clamp(0.0, 1.0).max(*last);
        *last = progress;
        let _ = self.tx.try_send(WorkerMessage::Progress(ProgressUpdate {
            step,
            progress,
            message: message.into(),
        }));
    }
}

pub struct DocumentWorker {
    engines: Engines,
    config: WorkerConfig,
}

impl DocumentWorker {
    pub fn new(engines: Engines, config: WorkerConfig) -> Self {
        DocumentWorker { engines, config }
    }

    /// Run on its own task; requests are handled one at a time in arrival order.
    pub fn spawn(self) -> WorkerHandle {
        let (req_tx, req_rx) = mpsc::channel(REQUEST_QUEUE);
        let (msg_tx, msg_rx) = mpsc::channel(MESSAGE_QUEUE);
        tokio::spawn(self.run(req_rx, msg_tx));
        WorkerHandle {
            requests: req_tx,
            messages: msg_rx,
        }
    }

    pub async fn run(
        self,
        mut requests: mpsc::Receiver<WorkerRequest>,
        messages: mpsc::Sender<WorkerMessage>,
    ) {
        if let Err(e) = self.engines.ensure_ready().await {
            error!("document worker unavailable: {:#}", e);
            let _ = messages
                .send(WorkerMessage::Error {
                    id: None,
                    error: format!("{:#}", e),
                })
                .await;
            return;
        }
        info!("document worker ready");

        while let Some(request) = requests.recv().await {
            let WorkerRequest::ProcessDocument(request) = request;
            let id = request.id.clone();
            let outcome = AssertUnwindSafe(self.process(request, &messages))
                .catch_unwind()
                .await;

            let terminal = match outcome {
                Ok(Ok(message)) => message,
                Ok(Err(e)) => {
                    warn!("request {} failed: {:#}", id, e);
                    WorkerMessage::Error {
                        id: Some(id),
                        error: format!("{:#}", e),
                    }
                }
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "worker panicked".to_string());
                    error!("request {} panicked: {}", id, reason);
                    WorkerMessage::Error {
                        id: Some(id),
                        error: reason,
                    }
                }
            };
            if messages.send(terminal).await.is_err() {
                break;
            }
        }
    }

    async fn process(
        &self,
        request: DocumentRequest,
        messages: &mpsc::Sender<WorkerMessage>,
    ) -> Result<WorkerMessage> {
        let progress = ProgressReporter::new(messages.clone());
        progress.report(Step::Loading, 0.0, format!("Processing {}", request.file_name));

        match request.file_type {
            DocumentType::Pdf => {
                let text = self.pdf_text(&request.file_data, &progress).await?;
                progress.report(Step::Parsing, 1.0, "Detecting sections");
                let sections = parse_text_into_sections(&text, &request.file_name);
                progress.report(Step::Done, 1.0, "Done");
                Ok(WorkerMessage::Result {
                    id: request.id,
                    sections,
                })
            }
            DocumentType::Image => {
                progress.report(Step::Ocr, 0.2, "Recognizing text");
                let on_progress = |fraction: f32| {
                    progress.report(
                        Step::Ocr,
                        0.2 + 0.6 * fraction.clamp(0.0, 1.0),
                        "Recognizing text",
                    )
                };
                let text = self
                    .engines
                    .ocr
                    .recognize(&request.file_data, &on_progress)
                    .await?;
                progress.report(Step::Parsing, 0.9, "Detecting sections");
                let sections = parse_text_into_sections(&text, &request.file_name);
                let mime = mime_for_extension(&extension(&request.file_name));
                let data_url = to_data_url(mime, &request.file_data);
                progress.report(Step::Done, 1.0, "Done");
                Ok(WorkerMessage::ImageResult {
                    id: request.id,
                    sections,
                    data_url,
                })
            }
        }
    }

    /// Text layer first; rasterize and OCR every page when it looks unusable.
    async fn pdf_text(&self, data: &[u8], progress: &ProgressReporter) -> Result<String> {
        progress.report(Step::Extracting, 0.1, "Reading PDF text");
        let layer = Arc::clone(&self.engines.pdf);
        let bytes = data.to_vec();
        let threshold = self.config.line_break_threshold;
        let reporter = progress.clone();
        // lopdf parsing is CPU-bound; keep it off the runtime's worker threads.
        let extraction = tokio::task::spawn_blocking(move || {
            extract_text_layer(layer.as_ref(), &bytes, threshold, &reporter)
        });
        let (text, pages) = match extraction.await {
            Ok(result) => result?,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => return Err(e.into()),
        };

        if !needs_ocr(&text, &self.config) {
            return Ok(text);
        }
        info!(
            "text layer unusable (alpha ratio {:.2}, {} chars), running OCR on {} pages",
            alpha_ratio(&text),
            text.trim().chars().count(),
            pages
        );

        let mut texts = Vec::with_capacity(pages);
        for page in 0..pages {
            let base = 0.5 + 0.5 * page as f32 / pages as f32;
            let span = 0.5 / pages as f32;
            progress.report(
                Step::Ocr,
                base,
                format!("Rendering page {} of {}", page + 1, pages),
            );
            let image = self
                .engines
                .rasterizer
                .render_page(data, page, self.config.render_scale)
                .await?;
            let message = format!("Recognizing page {} of {}", page + 1, pages);
            let on_progress = |fraction: f32| {
                progress.report(Step::Ocr, base + span * fraction.clamp(0.0, 1.0), message.as_str())
            };
            texts.push(self.engines.ocr.recognize(&image, &on_progress).await?);
        }
        Ok(texts.join("\n\n"))
    }
}

/// Page texts from the PDF text layer, reporting 10%..50% progress as pages complete.
fn extract_text_layer(
    layer: &dyn PdfTextLayer,
    data: &[u8],
    threshold: f32,
    progress: &ProgressReporter,
) -> Result<(String, usize)> {
    let doc = layer.open(data)?;
    let pages = doc.page_count();
    let mut texts = Vec::with_capacity(pages);
    for page in 0..pages {
        let runs = doc.text_runs(page)?;
        texts.push(join_runs(&runs, threshold));
        progress.report(
            Step::Extracting,
            0.1 + 0.4 * (page + 1) as f32 / pages as f32,
            format!("Extracted page {} of {}", page + 1, pages),
        );
    }
    Ok((texts.join("\n\n"), pages))
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::{Duration, Instant};

    use super::protocol::DocumentRequest;
    use super::testing::*;
    use super::*;

    fn pdf_request(id: &str, data: &[u8]) -> WorkerRequest {
        WorkerRequest::ProcessDocument(DocumentRequest {
            id: id.to_string(),
            file_type: DocumentType::Pdf,
            file_data: data.to_vec(),
            file_name: "report.pdf".to_string(),
        })
    }

    async fn collect_until_terminal(handle: &mut WorkerHandle) -> (Vec<f32>, WorkerMessage) {
        let mut progress = Vec::new();
        while let Some(message) = handle.messages.recv().await {
            match message {
                WorkerMessage::Progress(update) => progress.push(update.progress),
                terminal => return (progress, terminal),
            }
        }
        panic!("worker closed without a terminal message");
    }

    #[test]
    fn alpha_ratio_guards_empty_text() {
        assert_eq!(alpha_ratio(""), 0.0);
        assert_eq!(alpha_ratio("   \n"), 0.0);
        assert_eq!(alpha_ratio("ab 12"), 0.5);
        assert!(needs_ocr("short", &WorkerConfig::default()));
    }

    #[tokio::test]
    async fn good_text_layer_skips_ocr() {
        let ocr = Arc::new(FakeOcr::new("unused"));
        let mut handle =
            DocumentWorker::new(engines(good_pages(), ocr.clone()), WorkerConfig::default()).spawn();
        handle.requests.send(pdf_request("a", b"%PDF-1.7")).await.unwrap();

        let (progress, terminal) = collect_until_terminal(&mut handle).await;
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        match terminal {
            WorkerMessage::Result { id, sections } => {
                assert_eq!(id, "a");
                let names: Vec<_> = sections.iter().map(|s| s.name.as_str()).collect();
                assert_eq!(names, vec!["Header", "Introduction", "Conclusion"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn low_alpha_text_triggers_ocr_with_monotonic_progress() {
        let ocr = Arc::new(FakeOcr::new("Results\nRevenue doubled compared to last year."));
        let mut handle =
            DocumentWorker::new(engines(garbage_pages(), ocr.clone()), WorkerConfig::default())
                .spawn();
        handle.requests.send(pdf_request("b", b"%PDF-1.4")).await.unwrap();

        let (progress, terminal) = collect_until_terminal(&mut handle).await;
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
        assert!(!progress.is_empty());
        assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{:?}", progress);
        assert!(progress.iter().any(|p| *p > 0.5 && *p < 1.0));
        match terminal {
            WorkerMessage::Result { sections, .. } => assert_eq!(sections[1].name, "Results"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn image_request_returns_data_url() {
        let ocr = Arc::new(FakeOcr::new("Summary\nA scanned receipt."));
        let mut handle =
            DocumentWorker::new(engines(vec![], ocr), WorkerConfig::default()).spawn();
        handle
            .requests
            .send(WorkerRequest::ProcessDocument(DocumentRequest {
                id: "img".into(),
                file_type: DocumentType::Image,
                file_data: vec![1, 2, 3],
                file_name: "receipt.png".into(),
            }))
            .await
            .unwrap();

        let (progress, terminal) = collect_until_terminal(&mut handle).await;
        assert!(progress.iter().all(|p| (0.0..=1.0).contains(p)));
        match terminal {
            WorkerMessage::ImageResult { id, sections, data_url } => {
                assert_eq!(id, "img");
                assert_eq!(data_url, "data:image/png;base64,AQID");
                assert_eq!(sections[1].name, "Summary");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn failures_are_isolated_per_request() {
        let ocr = Arc::new(FakeOcr::new(""));
        let mut handle =
            DocumentWorker::new(engines(good_pages(), ocr), WorkerConfig::default()).spawn();
        handle.requests.send(pdf_request("bad", b"garbage")).await.unwrap();
        handle.requests.send(pdf_request("boom", b"%PANIC")).await.unwrap();
        handle.requests.send(pdf_request("ok", b"%PDF")).await.unwrap();

        let (_, first) = collect_until_terminal(&mut handle).await;
        assert!(matches!(first, WorkerMessage::Error { id: Some(ref id), .. } if id == "bad"));
        let (_, second) = collect_until_terminal(&mut handle).await;
        assert!(
            matches!(second, WorkerMessage::Error { id: Some(ref id), ref error } if id == "boom" && error.contains("cross-reference"))
        );
        let (_, third) = collect_until_terminal(&mut handle).await;
        assert!(matches!(third, WorkerMessage::Result { ref id, .. } if id == "ok"));
    }

    #[tokio::test]
    async fn slow_text_layer_does_not_stall_the_host() {
        let engines = Engines {
            pdf: Arc::new(SlowPdf {
                delay: Duration::from_millis(500),
            }),
            rasterizer: Arc::new(FakeRasterizer),
            ocr: Arc::new(FakeOcr::new("")),
        };
        let mut handle = DocumentWorker::new(engines, WorkerConfig::default()).spawn();
        handle.requests.send(pdf_request("slow", b"%PDF")).await.unwrap();

        let started = Instant::now();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(started.elapsed() < Duration::from_millis(250), "{:?}", started.elapsed());

        let (_, terminal) = collect_until_terminal(&mut handle).await;
        assert!(matches!(terminal, WorkerMessage::Result { ref id, .. } if id == "slow"));
    }

    #[tokio::test]
    async fn missing_dependency_is_reported_once_without_id() {
        let mut ocr = FakeOcr::new("");
        ocr.available = false;
        let mut handle =
            DocumentWorker::new(engines(good_pages(), Arc::new(ocr)), WorkerConfig::default())
                .spawn();

        let message = handle.messages.recv().await.unwrap();
        assert!(matches!(message, WorkerMessage::Error { id: None, .. }));
        assert!(handle.messages.recv().await.is_none());
        assert!(handle.requests.send(pdf_request("late", b"%PDF")).await.is_err());
    }
}
