use serde::{Deserialize, Serialize};

use crate::model::Section;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Pdf,
    Image,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRequest {
    pub id: String,
    pub file_type: DocumentType,
    #[serde(with = "base64_bytes")]
    pub file_data: Vec<u8>,
    pub file_name: String,
}

/// Host → worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerRequest {
    ProcessDocument(DocumentRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Loading,
    Extracting,
    Ocr,
    Parsing,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub step: Step,
    /// Overall completion in `0.0..=1.0`.
    pub progress: f32,
    pub message: String,
}

/// Worker → host. Every request id gets exactly one terminal message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerMessage {
    Progress(ProgressUpdate),
    Result {
        id: String,
        sections: Vec<Section>,
    },
    #[serde(rename_all = "camelCase")]
    ImageResult {
        id: String,
        sections: Vec<Section>,
        data_url: String,
    },
    /// `id` is absent only for the load-time failure that disables the worker.
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        error: String,
    },
}

impl WorkerMessage {
    pub fn id(&self) -> Option<&str> {
        match self {
            WorkerMessage::Progress(_) => None,
            WorkerMessage::Result { id, .. } | WorkerMessage::ImageResult { id, .. } => Some(id),
            WorkerMessage::Error { id, .. } => id.as_deref(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkerMessage::Progress(_))
    }
}

/// `fileData` travels as base64 text in JSON.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
