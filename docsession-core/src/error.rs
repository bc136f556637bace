//! Error types and result types for document store operations.
//!
//! This module provides error handling for every store, session and backend operation.
//! Use [`DocumentStoreResult<T>`] as the return type for fallible operations.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

use crate::document::Version;

/// Represents all possible errors that can occur when interacting with a document store.
///
/// Transport and conflict errors are surfaced to the caller unmodified. Nothing in this
/// crate retries on the caller's behalf, since a retry needs a decision about whether
/// the staged changes are still valid.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// The store could not be configured (malformed URL, unsupported scheme, bad options).
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// The store handle was used after [`dispose`](crate::store::DocumentStore::dispose).
    #[error("Document store has been disposed")]
    StoreDisposed,
    /// The session was used after it committed or was disposed.
    #[error("Session is closed")]
    SessionClosed,
    /// The requested document does not exist.
    #[error("Document not found: {0}")]
    DocumentNotFound(String),
    /// The stored version of a document moved on since the session observed it.
    #[error(
        "Concurrency conflict on {id}: expected version {}, found {}",
        display_version(.expected),
        display_version(.actual)
    )]
    ConcurrencyConflict {
        /// Identity of the conflicting document.
        id: String,
        /// The version the session expected (`None` means the document was expected to be absent).
        expected: Option<Version>,
        /// The version currently stored (`None` means the document is absent).
        actual: Option<Version>,
    },
    /// A request did not complete within its timeout.
    #[error("Request timed out: {0}")]
    Timeout(String),
    /// A network-layer failure while talking to the remote store.
    #[error("Transport error: {0}")]
    Transport(String),
    /// The document violates structural expectations.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// An index definition is malformed.
    #[error("Invalid index definition: {0}")]
    InvalidIndex(String),
    /// A query named an index the store does not know.
    #[error("Index not found: {0}")]
    IndexNotFound(String),
    /// A patch operation could not be applied to the stored document.
    #[error("Invalid patch: {0}")]
    InvalidPatch(String),
    /// The session has used up its round-trip allowance.
    #[error("Session exceeded its limit of {0} requests")]
    RequestLimitExceeded(usize),
    /// Reading local input (such as an attachment stream) failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// A specialized `Result` type for document store operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

fn display_version(version: &Option<Version>) -> String {
    match version {
        Some(version) => version.to_string(),
        None => "<none>".to_string(),
    }
}

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl DocumentStoreError {
    /// Returns `true` for failures that a caller may retry with a fresh session.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DocumentStoreError::Timeout(_) | DocumentStoreError::Transport(_)
        )
    }
}
