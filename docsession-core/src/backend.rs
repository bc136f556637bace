//! Storage backend abstraction for the document store.
//!
//! This module defines the capability interface a remote document store offers to
//! sessions and store handles, so that an in-memory store can stand in for the network.
//!
//! # Overview
//!
//! The [`StoreBackend`] trait is the full set of requests a session or store handle ever
//! makes. Each method is exactly one round trip. Implementations are required to be
//! thread-safe (`Send + Sync`) and support concurrent access.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`DynStoreBackend`]: A trait for dynamic dispatch over backend implementations
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! use docsession::backend::{BatchCommand, StoreBackend, VersionCheck};
//! use bson::doc;
//!
//! let results = backend
//!     .commit_batch(vec![BatchCommand::Put {
//!         id: "Characters/1".to_string(),
//!         collection: "Characters".to_string(),
//!         document: doc! { "Name": "Mike" },
//!         expected: VersionCheck::Missing,
//!         provisional: false,
//!     }])
//!     .await?;
//! ```

use async_trait::async_trait;
use bson::Document as BsonDocument;
use serde::{Deserialize, Serialize};
use std::{any::Any, fmt::Debug};

use crate::{
    attachment::{Attachment, AttachmentMetadata},
    document::{StoredDocument, Version},
    error::DocumentStoreResult,
    index::{IndexDefinition, IndexRegistration},
    page::QueryStatistics,
    patch::PatchOperation,
    query::Query,
};

/// Answer to [`StoreBackend::get_documents`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadResult {
    /// One slot per requested identity, in request order; `None` when absent.
    pub results: Vec<Option<StoredDocument>>,
    /// Documents referenced through the requested include paths.
    pub includes: Vec<StoredDocument>,
}

/// One row of a query answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryHit {
    /// A stored document.
    Document(StoredDocument),
    /// An index entry (map or reduce output).
    Entry(BsonDocument),
}

/// Answer to [`StoreBackend::query_documents`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub hits: Vec<QueryHit>,
    pub includes: Vec<StoredDocument>,
    pub statistics: QueryStatistics,
}

/// Concurrency precondition attached to a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionCheck {
    /// Write regardless of the stored version.
    Any,
    /// The document must not exist.
    Missing,
    /// The stored version must equal this one.
    Matches(Version),
}

impl VersionCheck {
    /// Returns the version this check expects, if any.
    pub fn expected(&self) -> Option<Version> {
        match self {
            VersionCheck::Matches(version) => Some(version.clone()),
            VersionCheck::Any | VersionCheck::Missing => None,
        }
    }

    /// Returns `true` if a document stored with `actual` satisfies the check.
    pub fn admits(&self, actual: Option<&Version>) -> bool {
        match (self, actual) {
            (VersionCheck::Any, _) => true,
            (VersionCheck::Missing, actual) => actual.is_none(),
            (VersionCheck::Matches(expected), Some(actual)) => expected == actual,
            (VersionCheck::Matches(_), None) => false,
        }
    }
}

/// One entry of an atomic write batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BatchCommand {
    /// Insert or replace a document. With `provisional` set, `id` is a prefix and the
    /// store appends the next number for `collection`; otherwise `id` is stored as given.
    Put {
        id: String,
        collection: String,
        document: BsonDocument,
        expected: VersionCheck,
        #[serde(default)]
        provisional: bool,
    },
    /// Remove a document. Removing an absent document is not an error unless `expected`
    /// names a version.
    Delete { id: String, expected: VersionCheck },
}

impl BatchCommand {
    pub fn id(&self) -> &str {
        match self {
            BatchCommand::Put { id, .. } | BatchCommand::Delete { id, .. } => id,
        }
    }
}

/// Result of one [`BatchCommand`], in batch order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BatchResult {
    /// The document was written under `id` (final, even if the command's was provisional).
    Put { id: String, version: Version },
    Delete { id: String },
}

/// A block of identity numbers reserved for one client, `low..=high`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRange {
    pub low: u64,
    pub high: u64,
}

/// Abstract interface for remote document stores.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from multiple
/// async tasks. Sessions are single-owner, but many sessions and the store handle share
/// one backend.
///
/// # Error Handling
///
/// Operations return [`DocumentStoreResult<T>`](crate::error::DocumentStoreResult).
/// Backends never retry; a failed request leaves the store unchanged.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Fetches documents by identity, plus the documents referenced by `includes`.
    ///
    /// # Returns
    ///
    /// One slot per requested identity, in request order.
    async fn get_documents(
        &self,
        ids: Vec<String>,
        includes: Vec<String>,
    ) -> DocumentStoreResult<LoadResult>;

    /// Runs a query against a named index, an automatic index, or a collection scan.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::IndexNotFound`](crate::error::DocumentStoreError::IndexNotFound)
    /// when the query names an index that was never registered.
    async fn query_documents(&self, query: Query) -> DocumentStoreResult<QueryResult>;

    /// Applies a batch of writes atomically.
    ///
    /// Every [`VersionCheck`] is evaluated before anything is applied. On the first failing
    /// check the whole batch is rejected with
    /// [`DocumentStoreError::ConcurrencyConflict`](crate::error::DocumentStoreError::ConcurrencyConflict).
    ///
    /// # Returns
    ///
    /// One result per command, in batch order.
    async fn commit_batch(
        &self,
        commands: Vec<BatchCommand>,
    ) -> DocumentStoreResult<Vec<BatchResult>>;

    /// Writes an attachment, replacing any existing data and metadata under `key`.
    async fn put_attachment(
        &self,
        key: &str,
        data: Vec<u8>,
        metadata: AttachmentMetadata,
    ) -> DocumentStoreResult<()>;

    /// Reads an attachment, or `None` if nothing is stored under `key`.
    async fn get_attachment(&self, key: &str) -> DocumentStoreResult<Option<Attachment>>;

    /// Removes an attachment. Removing an absent key is not an error.
    async fn delete_attachment(&self, key: &str) -> DocumentStoreResult<()>;

    /// Applies patch operations to a stored document and returns its new version.
    ///
    /// # Errors
    ///
    /// Returns `DocumentNotFound` if `id` is absent and `InvalidPatch` if an operation
    /// does not fit the document; in both cases nothing is written.
    async fn patch_document(
        &self,
        id: &str,
        operations: Vec<PatchOperation>,
    ) -> DocumentStoreResult<Version>;

    /// Registers index definitions. Registering an identical definition again is a no-op.
    async fn put_indexes(
        &self,
        definitions: Vec<IndexDefinition>,
    ) -> DocumentStoreResult<Vec<IndexRegistration>>;

    /// Reserves the next block of identity numbers for `collection`.
    async fn next_identity_range(&self, collection: &str) -> DocumentStoreResult<IdentityRange>;

    /// Releases the backend's resources. Called once when the owning store is disposed.
    ///
    /// The default implementation is a no-op.
    async fn close(&self) -> DocumentStoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl<B> StoreBackend for &B
where
    B: StoreBackend,
{
    async fn get_documents(
        &self,
        ids: Vec<String>,
        includes: Vec<String>,
    ) -> DocumentStoreResult<LoadResult> {
        (*self).get_documents(ids, includes).await
    }

    async fn query_documents(&self, query: Query) -> DocumentStoreResult<QueryResult> {
        (*self).query_documents(query).await
    }

    async fn commit_batch(
        &self,
        commands: Vec<BatchCommand>,
    ) -> DocumentStoreResult<Vec<BatchResult>> {
        (*self).commit_batch(commands).await
    }

    async fn put_attachment(
        &self,
        key: &str,
        data: Vec<u8>,
        metadata: AttachmentMetadata,
    ) -> DocumentStoreResult<()> {
        (*self).put_attachment(key, data, metadata).await
    }

    async fn get_attachment(&self, key: &str) -> DocumentStoreResult<Option<Attachment>> {
        (*self).get_attachment(key).await
    }

    async fn delete_attachment(&self, key: &str) -> DocumentStoreResult<()> {
        (*self).delete_attachment(key).await
    }

    async fn patch_document(
        &self,
        id: &str,
        operations: Vec<PatchOperation>,
    ) -> DocumentStoreResult<Version> {
        (*self).patch_document(id, operations).await
    }

    async fn put_indexes(
        &self,
        definitions: Vec<IndexDefinition>,
    ) -> DocumentStoreResult<Vec<IndexRegistration>> {
        (*self).put_indexes(definitions).await
    }

    async fn next_identity_range(&self, collection: &str) -> DocumentStoreResult<IdentityRange> {
        (*self).next_identity_range(collection).await
    }

    async fn close(&self) -> DocumentStoreResult<()> {
        (*self).close().await
    }
}

/// Object-safe mirror of [`StoreBackend`], used to pick a backend at runtime.
#[async_trait]
pub trait DynStoreBackend: Send + Sync + Debug {
    async fn get_documents(
        &self,
        ids: Vec<String>,
        includes: Vec<String>,
    ) -> DocumentStoreResult<LoadResult>;
    async fn query_documents(&self, query: Query) -> DocumentStoreResult<QueryResult>;
    async fn commit_batch(
        &self,
        commands: Vec<BatchCommand>,
    ) -> DocumentStoreResult<Vec<BatchResult>>;
    async fn put_attachment(
        &self,
        key: &str,
        data: Vec<u8>,
        metadata: AttachmentMetadata,
    ) -> DocumentStoreResult<()>;
    async fn get_attachment(&self, key: &str) -> DocumentStoreResult<Option<Attachment>>;
    async fn delete_attachment(&self, key: &str) -> DocumentStoreResult<()>;
    async fn patch_document(
        &self,
        id: &str,
        operations: Vec<PatchOperation>,
    ) -> DocumentStoreResult<Version>;
    async fn put_indexes(
        &self,
        definitions: Vec<IndexDefinition>,
    ) -> DocumentStoreResult<Vec<IndexRegistration>>;
    async fn next_identity_range(&self, collection: &str) -> DocumentStoreResult<IdentityRange>;
    async fn close(&self) -> DocumentStoreResult<()>;

    fn as_any(&self) -> &dyn Any;
}

#[async_trait]
impl<B: StoreBackend + Send + Sync + 'static> DynStoreBackend for B {
    async fn get_documents(
        &self,
        ids: Vec<String>,
        includes: Vec<String>,
    ) -> DocumentStoreResult<LoadResult> {
        StoreBackend::get_documents(self, ids, includes).await
    }

    async fn query_documents(&self, query: Query) -> DocumentStoreResult<QueryResult> {
        StoreBackend::query_documents(self, query).await
    }

    async fn commit_batch(
        &self,
        commands: Vec<BatchCommand>,
    ) -> DocumentStoreResult<Vec<BatchResult>> {
        StoreBackend::commit_batch(self, commands).await
    }

    async fn put_attachment(
        &self,
        key: &str,
        data: Vec<u8>,
        metadata: AttachmentMetadata,
    ) -> DocumentStoreResult<()> {
        StoreBackend::put_attachment(self, key, data, metadata).await
    }

    async fn get_attachment(&self, key: &str) -> DocumentStoreResult<Option<Attachment>> {
        StoreBackend::get_attachment(self, key).await
    }

    async fn delete_attachment(&self, key: &str) -> DocumentStoreResult<()> {
        StoreBackend::delete_attachment(self, key).await
    }

    async fn patch_document(
        &self,
        id: &str,
        operations: Vec<PatchOperation>,
    ) -> DocumentStoreResult<Version> {
        StoreBackend::patch_document(self, id, operations).await
    }

    async fn put_indexes(
        &self,
        definitions: Vec<IndexDefinition>,
    ) -> DocumentStoreResult<Vec<IndexRegistration>> {
        StoreBackend::put_indexes(self, definitions).await
    }

    async fn next_identity_range(&self, collection: &str) -> DocumentStoreResult<IdentityRange> {
        StoreBackend::next_identity_range(self, collection).await
    }

    async fn close(&self) -> DocumentStoreResult<()> {
        StoreBackend::close(self).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
impl StoreBackend for Box<dyn DynStoreBackend> {
    async fn get_documents(
        &self,
        ids: Vec<String>,
        includes: Vec<String>,
    ) -> DocumentStoreResult<LoadResult> {
        self.as_ref().get_documents(ids, includes).await
    }

    async fn query_documents(&self, query: Query) -> DocumentStoreResult<QueryResult> {
        self.as_ref().query_documents(query).await
    }

    async fn commit_batch(
        &self,
        commands: Vec<BatchCommand>,
    ) -> DocumentStoreResult<Vec<BatchResult>> {
        self.as_ref().commit_batch(commands).await
    }

    async fn put_attachment(
        &self,
        key: &str,
        data: Vec<u8>,
        metadata: AttachmentMetadata,
    ) -> DocumentStoreResult<()> {
        self.as_ref().put_attachment(key, data, metadata).await
    }

    async fn get_attachment(&self, key: &str) -> DocumentStoreResult<Option<Attachment>> {
        self.as_ref().get_attachment(key).await
    }

    async fn delete_attachment(&self, key: &str) -> DocumentStoreResult<()> {
        self.as_ref().delete_attachment(key).await
    }

    async fn patch_document(
        &self,
        id: &str,
        operations: Vec<PatchOperation>,
    ) -> DocumentStoreResult<Version> {
        self.as_ref().patch_document(id, operations).await
    }

    async fn put_indexes(
        &self,
        definitions: Vec<IndexDefinition>,
    ) -> DocumentStoreResult<Vec<IndexRegistration>> {
        self.as_ref().put_indexes(definitions).await
    }

    async fn next_identity_range(&self, collection: &str) -> DocumentStoreResult<IdentityRange> {
        self.as_ref().next_identity_range(collection).await
    }

    async fn close(&self) -> DocumentStoreResult<()> {
        self.as_ref().close().await
    }
}

#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_checks_admit_matching_states() {
        let stored = Version::new("2-abc");

        assert!(VersionCheck::Any.admits(None));
        assert!(VersionCheck::Any.admits(Some(&stored)));
        assert!(VersionCheck::Missing.admits(None));
        assert!(!VersionCheck::Missing.admits(Some(&stored)));
        assert!(VersionCheck::Matches(stored.clone()).admits(Some(&stored)));
        assert!(!VersionCheck::Matches(Version::new("1-abc")).admits(Some(&stored)));
        assert!(!VersionCheck::Matches(stored).admits(None));
    }
}
