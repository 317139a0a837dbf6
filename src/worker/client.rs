use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::protocol::{DocumentRequest, DocumentType, ProgressUpdate, WorkerMessage, WorkerRequest};
use super::{DocumentWorker, Engines, WorkerHandle};
use crate::config::WorkerConfig;
use crate::error::{ErrorKind, ProcessingError};
use crate::model::Section;

/// Successful terminal reply for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    Sections(Vec<Section>),
    Image {
        sections: Vec<Section>,
        data_url: String,
    },
}

struct Pending {
    done: oneshot::Sender<WorkerMessage>,
    progress: Option<mpsc::UnboundedSender<ProgressUpdate>>,
}

#[derive(Default)]
struct Shared {
    pending: HashMap<String, Pending>,
    in_flight: Option<String>,
    load_error: Option<String>,
    closed: bool,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

/// Host side of one worker: requests keyed by id, one in flight at a time.
pub struct WorkerClient {
    requests: mpsc::Sender<WorkerRequest>,
    shared: Arc<Mutex<Shared>>,
    slot: tokio::sync::Mutex<()>,
}

impl WorkerClient {
    pub fn new(handle: WorkerHandle) -> Self {
        let shared = Arc::new(Mutex::new(Shared::default()));
        tokio::spawn(route(handle.messages, shared.clone()));
        WorkerClient {
            requests: handle.requests,
            shared,
            slot: tokio::sync::Mutex::new(()),
        }
    }

    pub fn spawn(engines: Engines, config: WorkerConfig) -> Self {
        Self::new(DocumentWorker::new(engines, config).spawn())
    }

    /// False once the worker reported a load failure or went away.
    pub fn is_available(&self) -> bool {
        let shared = lock(&self.shared);
        shared.load_error.is_none() && !shared.closed
    }

    pub async fn process(
        &self,
        file_type: DocumentType,
        file_name: &str,
        file_data: Vec<u8>,
        progress: Option<mpsc::UnboundedSender<ProgressUpdate>>,
    ) -> Result<WorkerOutcome, ProcessingError> {
        let _slot = self.slot.lock().await;

        let id = Uuid::new_v4().to_string();
        let (done, reply) = oneshot::channel();
        {
            let mut shared = lock(&self.shared);
            if shared.load_error.is_some() || shared.closed {
                return Err(unavailable(&shared));
            }
            shared.pending.insert(id.clone(), Pending { done, progress });
            shared.in_flight = Some(id.clone());
        }

        debug!("sending {} ({:?}) to worker as {}", file_name, file_type, id);
        let request = WorkerRequest::ProcessDocument(DocumentRequest {
            id: id.clone(),
            file_type,
            file_data,
            file_name: file_name.to_string(),
        });
        // A closed worker drops the pending entry, so the reply below resolves either way.
        let _ = self.requests.send(request).await;

        match reply.await {
            Ok(WorkerMessage::Result { sections, .. }) => Ok(WorkerOutcome::Sections(sections)),
            Ok(WorkerMessage::ImageResult {
                sections, data_url, ..
            }) => Ok(WorkerOutcome::Image { sections, data_url }),
            Ok(WorkerMessage::Error { error, .. }) => Err(ProcessingError::new(
                ErrorKind::WorkerProcessingFailure,
                error,
            )
            .with_context("request_id", &id)
            .with_context("file_name", file_name)),
            Ok(WorkerMessage::Progress(_)) => Err(ProcessingError::new(
                ErrorKind::WorkerProcessingFailure,
                "worker replied with a progress message",
            )),
            Err(_) => Err(unavailable(&lock(&self.shared)).with_context("request_id", &id)),
        }
    }
}

fn unavailable(shared: &Shared) -> ProcessingError {
    match &shared.load_error {
        Some(error) => ProcessingError::new(ErrorKind::WorkerDependencyLoadFailure, error.clone()),
        None => ProcessingError::new(ErrorKind::WorkerProcessingFailure, "worker exited"),
    }
}

/// Fan worker messages out to waiting callers until the worker closes its side.
async fn route(mut messages: mpsc::Receiver<WorkerMessage>, shared: Arc<Mutex<Shared>>) {
    while let Some(message) = messages.recv().await {
        let mut state = lock(&shared);
        match message {
            WorkerMessage::Progress(update) => {
                let sink = state
                    .in_flight
                    .as_ref()
                    .and_then(|id| state.pending.get(id))
                    .and_then(|pending| pending.progress.as_ref());
                if let Some(sink) = sink {
                    let _ = sink.send(update);
                }
            }
            WorkerMessage::Error { id: None, error } => {
                error!("worker failed to load: {}", error);
                state.load_error = Some(error);
                state.pending.clear();
                state.in_flight = None;
            }
            terminal => {
                let Some(id) = terminal.id().map(str::to_string) else {
                    continue;
                };
                if state.in_flight.as_deref() == Some(id.as_str()) {
                    state.in_flight = None;
                }
                match state.pending.remove(&id) {
                    Some(pending) => {
                        let _ = pending.done.send(terminal);
                    }
                    None => warn!("dropping reply for unknown request {}", id),
                }
            }
        }
    }

    let mut state = lock(&shared);
    state.closed = true;
    state.pending.clear();
    state.in_flight = None;
}

/// Round-robin over several workers so documents can be processed side by side.
pub struct WorkerPool {
    clients: Vec<WorkerClient>,
    next: AtomicUsize,
}

impl WorkerPool {
    pub fn new(clients: Vec<WorkerClient>) -> Self {
        WorkerPool {
            clients,
            next: AtomicUsize::new(0),
        }
    }

    pub fn spawn(size: usize, engines: Engines, config: WorkerConfig) -> Self {
        let clients = (0..size.max(1))
            .map(|_| WorkerClient::spawn(engines.clone(), config.clone()))
            .collect();
        Self::new(clients)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn is_available(&self) -> bool {
        self.clients.iter().any(WorkerClient::is_available)
    }

    /// Next client in turn, skipping ones that can no longer serve requests.
    fn pick(&self) -> Option<&WorkerClient> {
        let len = self.clients.len();
        if len == 0 {
            return None;
        }
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        (0..len)
            .map(|offset| &self.clients[(start + offset) % len])
            .find(|client| client.is_available())
            .or_else(|| self.clients.get(start % len))
    }

    pub async fn process(
        &self,
        file_type: DocumentType,
        file_name: &str,
        file_data: Vec<u8>,
        progress: Option<mpsc::UnboundedSender<ProgressUpdate>>,
    ) -> Result<WorkerOutcome, ProcessingError> {
        let client = self.pick().ok_or_else(|| {
            ProcessingError::new(ErrorKind::WorkerProcessingFailure, "worker pool is empty")
        })?;
        client.process(file_type, file_name, file_data, progress).await
    }
}
