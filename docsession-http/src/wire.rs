//! Request and response bodies of the store's HTTP API.
//!
//! These types are shared by the client in this crate and by anything that serves the API,
//! so both sides agree on the JSON shapes.

use serde::{Deserialize, Serialize};

use docsession_core::{
    attachment::AttachmentMetadata,
    backend::{BatchCommand, BatchResult},
    document::Version,
    error::DocumentStoreError,
    index::{IndexDefinition, IndexRegistration},
    patch::PatchOperation,
};

/// Header carrying attachment metadata as a JSON object.
pub const METADATA_HEADER: &str = "X-Attachment-Metadata";

/// Header carrying the attachment's last write time (RFC 3339).
pub const LAST_MODIFIED_HEADER: &str = "X-Attachment-Last-Modified";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRequest {
    pub ids: Vec<String>,
    #[serde(default)]
    pub includes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkRequest {
    pub commands: Vec<BatchCommand>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkResponse {
    pub results: Vec<BatchResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchRequest {
    pub operations: Vec<PatchOperation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchResponse {
    pub version: Version,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexesRequest {
    pub definitions: Vec<IndexDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexesResponse {
    pub registrations: Vec<IndexRegistration>,
}

/// Query string of the document and attachment endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdParams {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyParams {
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionParams {
    pub collection: String,
}

/// Category of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Conflict,
    NotFound,
    IndexNotFound,
    InvalidDocument,
    InvalidIndex,
    InvalidPatch,
    Serialization,
    Internal,
}

/// Body of every non-2xx response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Version>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<Version>,
}

impl ErrorResponse {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            id: None,
            expected: None,
            actual: None,
        }
    }

    /// HTTP status code a server answers this error with.
    pub fn status(&self) -> u16 {
        match self.kind {
            ErrorKind::Conflict => 409,
            ErrorKind::NotFound | ErrorKind::IndexNotFound => 404,
            ErrorKind::InvalidDocument
            | ErrorKind::InvalidIndex
            | ErrorKind::InvalidPatch
            | ErrorKind::Serialization => 400,
            ErrorKind::Internal => 500,
        }
    }

    /// Converts the response back into the error the server reported.
    pub fn into_error(self) -> DocumentStoreError {
        match self.kind {
            ErrorKind::Conflict => DocumentStoreError::ConcurrencyConflict {
                id: self.id.unwrap_or_default(),
                expected: self.expected,
                actual: self.actual,
            },
            ErrorKind::NotFound => {
                DocumentStoreError::DocumentNotFound(self.id.unwrap_or(self.message))
            }
            ErrorKind::IndexNotFound => {
                DocumentStoreError::IndexNotFound(self.id.unwrap_or(self.message))
            }
            ErrorKind::InvalidDocument => DocumentStoreError::InvalidDocument(self.message),
            ErrorKind::InvalidIndex => DocumentStoreError::InvalidIndex(self.message),
            ErrorKind::InvalidPatch => DocumentStoreError::InvalidPatch(self.message),
            ErrorKind::Serialization => DocumentStoreError::Serialization(self.message),
            ErrorKind::Internal => DocumentStoreError::Backend(self.message),
        }
    }
}

impl From<&DocumentStoreError> for ErrorResponse {
    fn from(err: &DocumentStoreError) -> Self {
        let message = err.to_string();

        match err {
            DocumentStoreError::ConcurrencyConflict { id, expected, actual } => Self {
                id: Some(id.clone()),
                expected: expected.clone(),
                actual: actual.clone(),
                ..Self::new(ErrorKind::Conflict, message)
            },
            DocumentStoreError::DocumentNotFound(id) => Self {
                id: Some(id.clone()),
                ..Self::new(ErrorKind::NotFound, message)
            },
            DocumentStoreError::IndexNotFound(name) => Self {
                id: Some(name.clone()),
                ..Self::new(ErrorKind::IndexNotFound, message)
            },
            DocumentStoreError::InvalidDocument(detail) => {
                Self::new(ErrorKind::InvalidDocument, detail.clone())
            }
            DocumentStoreError::InvalidIndex(detail) => {
                Self::new(ErrorKind::InvalidIndex, detail.clone())
            }
            DocumentStoreError::InvalidPatch(detail) => {
                Self::new(ErrorKind::InvalidPatch, detail.clone())
            }
            DocumentStoreError::Serialization(detail) => {
                Self::new(ErrorKind::Serialization, detail.clone())
            }
            _ => Self::new(ErrorKind::Internal, message),
        }
    }
}

/// Encodes attachment metadata for [`METADATA_HEADER`].
pub fn encode_metadata(metadata: &AttachmentMetadata) -> Result<String, serde_json::Error> {
    serde_json::to_string(metadata)
}

/// Decodes [`METADATA_HEADER`]. A missing header means no metadata.
pub fn decode_metadata(header: Option<&str>) -> Result<AttachmentMetadata, serde_json::Error> {
    match header {
        Some(value) => serde_json::from_str(value),
        None => Ok(AttachmentMetadata::new()),
    }
}
