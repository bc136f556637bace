//! In-memory storage implementation for document stores.
//!
//! This module provides an in-memory backend that honours the observable contract of a
//! remote document store: versions on every write, atomic batches with version checks,
//! eventually consistent indexes with a staleness flag, map/reduce, attachments, patches
//! and identity ranges.

use async_trait::async_trait;
use bson::Document as BsonDocument;
use chrono::{DateTime, Utc};
use futures::executor::block_on;
use mea::rwlock::RwLock;
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, PoisonError, mpsc},
    thread,
};
use tracing::{debug, trace};
use uuid::Uuid;

use docsession_core::{
    attachment::{Attachment, AttachmentMetadata},
    backend::{
        BatchCommand, BatchResult, IdentityRange, LoadResult, QueryHit, QueryResult, StoreBackend,
        StoreBackendBuilder,
    },
    document::{StoredDocument, Version, referenced_ids},
    error::{DocumentStoreError, DocumentStoreResult},
    index::{IndexDefinition, IndexOutcome, IndexRegistration},
    page::QueryStatistics,
    patch::{PatchOperation, apply_patch},
    query::{Projection, Query},
};

use crate::evaluator::{DocumentEvaluator, compare_documents};

/// When indexes catch up with writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IndexingMode {
    /// A worker thread reindexes after every write.
    #[default]
    Background,
    /// Indexes only catch up on [`InMemoryStore::run_indexing`] or a query that waits
    /// for non-stale results. Useful for observing staleness in tests.
    Manual,
}

#[derive(Debug)]
struct Entry {
    document: StoredDocument,
    etag: u64,
    created: u64,
}

#[derive(Debug)]
struct IndexState {
    definition: IndexDefinition,
    fingerprint: String,
    /// Entries per source document, in document creation order.
    entries: Vec<(String, Vec<BsonDocument>)>,
    indexed_through: u64,
    timestamp: DateTime<Utc>,
}

impl IndexState {
    fn new(definition: IndexDefinition, fingerprint: String) -> Self {
        Self {
            definition,
            fingerprint,
            entries: Vec::new(),
            indexed_through: 0,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug)]
struct State {
    database_id: Uuid,
    etag: u64,
    sequence: u64,
    documents: HashMap<String, Entry>,
    /// Last etag that touched each collection.
    collection_etags: HashMap<String, u64>,
    indexes: HashMap<String, IndexState>,
    attachments: HashMap<String, Attachment>,
    /// Highest identity number handed out per collection.
    identities: HashMap<String, u64>,
    identity_range_size: u64,
}

impl State {
    fn new(identity_range_size: u64) -> Self {
        Self {
            database_id: Uuid::new_v4(),
            etag: 0,
            sequence: 0,
            documents: HashMap::new(),
            collection_etags: HashMap::new(),
            indexes: HashMap::new(),
            attachments: HashMap::new(),
            identities: HashMap::new(),
            identity_range_size,
        }
    }

    fn next_version(&mut self) -> (u64, Version) {
        self.etag += 1;
        (self.etag, Version::new(format!("{}-{}", self.etag, self.database_id)))
    }

    fn write_document(&mut self, id: String, collection: String, body: BsonDocument) -> Version {
        let (etag, version) = self.next_version();
        let created = match self.documents.get(&id) {
            Some(existing) => existing.created,
            None => {
                self.sequence += 1;
                self.sequence
            }
        };

        self.collection_etags.insert(collection.clone(), etag);
        self.documents.insert(
            id.clone(),
            Entry {
                document: StoredDocument {
                    id,
                    collection,
                    version: version.clone(),
                    body,
                },
                etag,
                created,
            },
        );

        version
    }

    fn assign_identity(&mut self, prefix: &str, collection: &str) -> String {
        loop {
            let counter = self.identities.entry(collection.to_string()).or_insert(0);
            *counter += 1;
            let id = format!("{prefix}{counter}");
            if !self.documents.contains_key(&id) {
                return id;
            }
        }
    }

    fn collection_documents(&self, collection: &str) -> Vec<&Entry> {
        let mut documents = self
            .documents
            .values()
            .filter(|entry| entry.document.collection == collection)
            .collect::<Vec<_>>();
        documents.sort_by_key(|entry| entry.created);
        documents
    }

    fn is_stale(&self, index: &IndexState) -> bool {
        let collection = index.definition.collection();
        let last_write = self.collection_etags.get(collection).copied().unwrap_or(0);

        last_write > index.indexed_through
    }

    fn reindex(&mut self, name: &str) {
        let Some(index) = self.indexes.get(name) else {
            return;
        };
        if !self.is_stale(index) && index.indexed_through > 0 {
            return;
        }

        let entries = self
            .collection_documents(index.definition.collection())
            .into_iter()
            .map(|entry| {
                (
                    entry.document.id.clone(),
                    index.definition.index_document(&entry.document.body),
                )
            })
            .collect::<Vec<_>>();
        let through = self.etag;

        if let Some(index) = self.indexes.get_mut(name) {
            debug!(index = name, documents = entries.len(), "reindexed");
            index.entries = entries;
            index.indexed_through = through;
            index.timestamp = Utc::now();
        }
    }

    fn reindex_all(&mut self) {
        let stale = self
            .indexes
            .iter()
            .filter(|(_, index)| self.is_stale(index))
            .map(|(name, _)| name.clone())
            .collect::<Vec<_>>();

        for name in stale {
            self.reindex(&name);
        }
    }

    fn includes_for<'a>(
        &self,
        sources: impl IntoIterator<Item = &'a BsonDocument>,
        paths: &[String],
    ) -> Vec<StoredDocument> {
        let mut seen = HashSet::new();
        let mut includes = Vec::new();

        for source in sources {
            for path in paths {
                for id in referenced_ids(source, path) {
                    if let Some(entry) = self.documents.get(&id) {
                        if seen.insert(id) {
                            includes.push(entry.document.clone());
                        }
                    }
                }
            }
        }

        includes
    }
}

/// Thread-safe in-memory document store.
///
/// # Thread Safety
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing
/// it to be safely shared across async tasks. Multiple clones of the same instance
/// share the same underlying data.
///
/// # Performance
///
/// Queries scan every index entry, and reindexing rebuilds a whole index. This is a
/// test double and development store, not a database.
///
/// # Example
///
/// ```ignore
/// use docsession_memory::{InMemoryStore, IndexingMode};
/// use docsession::backend::StoreBackendBuilder;
///
/// let backend = InMemoryStore::builder()
///     .with_indexing_mode(IndexingMode::Manual)
///     .build()
///     .await?;
/// let store = DocumentStore::new(backend);
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
    mode: IndexingMode,
    indexer: Arc<Mutex<Option<mpsc::Sender<()>>>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates a new empty store with background indexing.
    pub fn new() -> Self {
        Self::with_options(IndexingMode::Background, DEFAULT_IDENTITY_RANGE_SIZE)
    }

    /// Creates a builder for constructing an `InMemoryStore` with custom options.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    fn with_options(mode: IndexingMode, identity_range_size: u64) -> Self {
        let state = Arc::new(RwLock::new(State::new(identity_range_size.max(1))));
        let indexer = match mode {
            IndexingMode::Background => Some(spawn_indexer(Arc::clone(&state))),
            IndexingMode::Manual => None,
        };

        Self {
            state,
            mode,
            indexer: Arc::new(Mutex::new(indexer)),
        }
    }

    pub fn indexing_mode(&self) -> IndexingMode {
        self.mode
    }

    /// Brings every stale index up to date.
    pub async fn run_indexing(&self) {
        self.state.write().await.reindex_all();
    }

    /// Returns whether the named index has writes it has not processed yet.
    pub async fn is_index_stale(&self, name: &str) -> DocumentStoreResult<bool> {
        let state = self.state.read().await;

        state
            .indexes
            .get(name)
            .map(|index| state.is_stale(index))
            .ok_or_else(|| DocumentStoreError::IndexNotFound(name.to_string()))
    }

    /// Returns the number of stored documents.
    pub async fn document_count(&self) -> usize {
        self.state.read().await.documents.len()
    }

    fn notify_indexer(&self) {
        let indexer = self.indexer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = indexer.as_ref() {
            // a closed channel means the store is shutting down
            let _ = sender.send(());
        }
    }
}

const DEFAULT_IDENTITY_RANGE_SIZE: u64 = 32;

fn spawn_indexer(state: Arc<RwLock<State>>) -> mpsc::Sender<()> {
    let (sender, receiver) = mpsc::channel::<()>();

    thread::spawn(move || {
        while receiver.recv().is_ok() {
            while receiver.try_recv().is_ok() {}

            block_on(async {
                state.write().await.reindex_all();
            });
        }

        debug!("indexing worker stopped");
    });

    sender
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn get_documents(
        &self,
        ids: Vec<String>,
        includes: Vec<String>,
    ) -> DocumentStoreResult<LoadResult> {
        let state = self.state.read().await;

        let results = ids
            .iter()
            .map(|id| state.documents.get(id).map(|entry| entry.document.clone()))
            .collect::<Vec<_>>();
        let includes = state.includes_for(
            results.iter().flatten().map(|document| &document.body),
            &includes,
        );

        Ok(LoadResult { results, includes })
    }

    async fn query_documents(&self, query: Query) -> DocumentStoreResult<QueryResult> {
        let index_name = match (&query.index, &query.filter, &query.collection) {
            (Some(name), _, _) => Some(name.clone()),
            (None, Some(filter), Some(collection)) => {
                let definition = IndexDefinition::auto(collection, &filter.field_paths());
                let name = definition.name.clone();

                let mut state = self.state.write().await;
                if !state.indexes.contains_key(&name) {
                    let fingerprint = definition.fingerprint()?;
                    debug!(index = %name, "created automatic index");
                    state.indexes.insert(name.clone(), IndexState::new(definition, fingerprint));
                    state.reindex(&name);
                }

                Some(name)
            }
            (None, None, Some(_)) => None,
            (None, _, None) => {
                return Err(DocumentStoreError::Backend(
                    "a query needs a collection or an index".to_string(),
                ));
            }
        };

        // the wait timeout is unused: reindexing inline always catches up
        if query.wait_for_non_stale.is_some() {
            if let Some(name) = &index_name {
                self.state.write().await.reindex(name);
            }
        }

        let state = self.state.read().await;
        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);

        let Some(name) = index_name else {
            // plain collection scan
            let collection = query.collection.clone().unwrap_or_default();
            let mut documents = state
                .collection_documents(&collection)
                .into_iter()
                .map(|entry| &entry.document)
                .collect::<Vec<_>>();
            documents.sort_by(|a, b| compare_documents(&a.body, &b.body, &query.sort));

            let total_results = documents.len();
            let page = documents
                .into_iter()
                .skip(offset)
                .take(limit)
                .cloned()
                .collect::<Vec<_>>();

            return Ok(QueryResult {
                includes: state.includes_for(page.iter().map(|doc| &doc.body), &query.includes),
                hits: page.into_iter().map(QueryHit::Document).collect(),
                statistics: QueryStatistics {
                    total_results,
                    is_stale: false,
                    index_name: format!("Collection/{collection}"),
                    index_timestamp: Utc::now(),
                },
            });
        };

        let index = state
            .indexes
            .get(&name)
            .ok_or_else(|| DocumentStoreError::IndexNotFound(name.clone()))?;
        let statistics = |total_results| QueryStatistics {
            total_results,
            is_stale: state.is_stale(index),
            index_name: name.clone(),
            index_timestamp: index.timestamp,
        };

        trace!(index = %name, "querying index");

        if let Some(reduce) = &index.definition.reduce {
            let mut entries = reduce.apply(index.entries.iter().flat_map(|(_, entries)| entries));
            entries.retain(|entry| DocumentEvaluator::matches(entry, query.filter.as_ref()));
            entries.sort_by(|a, b| compare_documents(a, b, &query.sort));

            let total_results = entries.len();
            return Ok(QueryResult {
                hits: entries
                    .into_iter()
                    .skip(offset)
                    .take(limit)
                    .map(QueryHit::Entry)
                    .collect(),
                includes: Vec::new(),
                statistics: statistics(total_results),
            });
        }

        match query.projection {
            Projection::IndexEntries => {
                let mut entries = index
                    .entries
                    .iter()
                    .flat_map(|(_, entries)| entries)
                    .filter(|entry| DocumentEvaluator::matches(entry, query.filter.as_ref()))
                    .collect::<Vec<_>>();
                entries.sort_by(|a, b| compare_documents(a, b, &query.sort));

                let total_results = entries.len();
                Ok(QueryResult {
                    hits: entries
                        .into_iter()
                        .skip(offset)
                        .take(limit)
                        .cloned()
                        .map(QueryHit::Entry)
                        .collect(),
                    includes: Vec::new(),
                    statistics: statistics(total_results),
                })
            }
            Projection::Documents => {
                let mut documents = index
                    .entries
                    .iter()
                    .filter(|(_, entries)| {
                        entries
                            .iter()
                            .any(|entry| DocumentEvaluator::matches(entry, query.filter.as_ref()))
                    })
                    .filter_map(|(id, _)| state.documents.get(id))
                    .map(|entry| &entry.document)
                    .collect::<Vec<_>>();
                documents.sort_by(|a, b| compare_documents(&a.body, &b.body, &query.sort));

                let total_results = documents.len();
                let page = documents
                    .into_iter()
                    .skip(offset)
                    .take(limit)
                    .cloned()
                    .collect::<Vec<_>>();

                Ok(QueryResult {
                    includes: state
                        .includes_for(page.iter().map(|doc| &doc.body), &query.includes),
                    hits: page.into_iter().map(QueryHit::Document).collect(),
                    statistics: statistics(total_results),
                })
            }
        }
    }

    async fn commit_batch(
        &self,
        commands: Vec<BatchCommand>,
    ) -> DocumentStoreResult<Vec<BatchResult>> {
        let results = {
            let mut state = self.state.write().await;

            for command in &commands {
                let (id, expected) = match command {
                    BatchCommand::Put { id, expected, .. } | BatchCommand::Delete { id, expected } => {
                        (id, expected)
                    }
                };
                let actual = state.documents.get(id).map(|entry| entry.document.version.clone());

                if !expected.admits(actual.as_ref()) {
                    debug!(id = %id, "rejected batch on version check");
                    return Err(DocumentStoreError::ConcurrencyConflict {
                        id: id.clone(),
                        expected: expected.expected(),
                        actual,
                    });
                }
            }

            let mut results = Vec::with_capacity(commands.len());
            for command in commands {
                match command {
                    BatchCommand::Put { id, collection, document, provisional, .. } => {
                        let id = if provisional {
                            state.assign_identity(&id, &collection)
                        } else {
                            id
                        };
                        let version = state.write_document(id.clone(), collection, document);
                        trace!(id = %id, %version, "stored document");
                        results.push(BatchResult::Put { id, version });
                    }
                    BatchCommand::Delete { id, .. } => {
                        if let Some(entry) = state.documents.remove(&id) {
                            let (etag, _) = state.next_version();
                            state.collection_etags.insert(entry.document.collection, etag);
                            trace!(id = %id, "deleted document");
                        }
                        results.push(BatchResult::Delete { id });
                    }
                }
            }

            results
        };

        self.notify_indexer();

        Ok(results)
    }

    async fn put_attachment(
        &self,
        key: &str,
        data: Vec<u8>,
        metadata: AttachmentMetadata,
    ) -> DocumentStoreResult<()> {
        let attachment = Attachment::new(key, data, metadata);
        self.state
            .write()
            .await
            .attachments
            .insert(key.to_string(), attachment);

        Ok(())
    }

    async fn get_attachment(&self, key: &str) -> DocumentStoreResult<Option<Attachment>> {
        Ok(self.state.read().await.attachments.get(key).cloned())
    }

    async fn delete_attachment(&self, key: &str) -> DocumentStoreResult<()> {
        self.state.write().await.attachments.remove(key);

        Ok(())
    }

    async fn patch_document(
        &self,
        id: &str,
        operations: Vec<PatchOperation>,
    ) -> DocumentStoreResult<Version> {
        let version = {
            let mut state = self.state.write().await;
            let entry = state
                .documents
                .get(id)
                .ok_or_else(|| DocumentStoreError::DocumentNotFound(id.to_string()))?;

            let patched = apply_patch(&entry.document.body, &operations)?;
            let collection = entry.document.collection.clone();

            state.write_document(id.to_string(), collection, patched)
        };

        self.notify_indexer();

        Ok(version)
    }

    async fn put_indexes(
        &self,
        definitions: Vec<IndexDefinition>,
    ) -> DocumentStoreResult<Vec<IndexRegistration>> {
        for definition in &definitions {
            definition.validate()?;
        }

        let registrations = {
            let mut state = self.state.write().await;
            let mut registrations = Vec::with_capacity(definitions.len());

            for definition in definitions {
                let fingerprint = definition.fingerprint()?;
                let name = definition.name.clone();

                let outcome = match state.indexes.get(&name) {
                    Some(existing) if existing.fingerprint == fingerprint => IndexOutcome::Unchanged,
                    Some(_) => IndexOutcome::Updated,
                    None => IndexOutcome::Created,
                };

                if outcome != IndexOutcome::Unchanged {
                    state
                        .indexes
                        .insert(name.clone(), IndexState::new(definition, fingerprint));
                }

                registrations.push(IndexRegistration { name, outcome });
            }

            registrations
        };

        self.notify_indexer();

        Ok(registrations)
    }

    async fn next_identity_range(&self, collection: &str) -> DocumentStoreResult<IdentityRange> {
        let mut state = self.state.write().await;
        let size = state.identity_range_size;
        let counter = state.identities.entry(collection.to_string()).or_insert(0);

        let low = *counter + 1;
        *counter += size;

        Ok(IdentityRange { low, high: *counter })
    }

    async fn close(&self) -> DocumentStoreResult<()> {
        // dropping the sender ends the worker loop
        self.indexer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        Ok(())
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// ```ignore
/// use docsession_memory::{InMemoryStore, IndexingMode};
/// use docsession::backend::StoreBackendBuilder;
///
/// let store = InMemoryStore::builder()
///     .with_indexing_mode(IndexingMode::Manual)
///     .with_identity_range_size(8)
///     .build()
///     .await?;
/// ```
#[derive(Debug)]
pub struct InMemoryStoreBuilder {
    indexing_mode: IndexingMode,
    identity_range_size: u64,
}

impl Default for InMemoryStoreBuilder {
    fn default() -> Self {
        Self {
            indexing_mode: IndexingMode::default(),
            identity_range_size: DEFAULT_IDENTITY_RANGE_SIZE,
        }
    }
}

impl InMemoryStoreBuilder {
    pub fn with_indexing_mode(mut self, mode: IndexingMode) -> Self {
        self.indexing_mode = mode;
        self
    }

    /// Sets how many identity numbers one [`StoreBackend::next_identity_range`] call reserves.
    pub fn with_identity_range_size(mut self, size: u64) -> Self {
        self.identity_range_size = size;
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(InMemoryStore::with_options(
            self.indexing_mode,
            self.identity_range_size,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use docsession_core::{
        backend::VersionCheck,
        index::{MapDefinition, ReduceDefinition},
        query::{Filter, SortDirection},
    };

    async fn manual_store() -> InMemoryStore {
        InMemoryStore::builder()
            .with_indexing_mode(IndexingMode::Manual)
            .build()
            .await
            .unwrap()
    }

    fn put(id: &str, document: BsonDocument, expected: VersionCheck) -> BatchCommand {
        BatchCommand::Put {
            id: id.to_string(),
            collection: "Characters".to_string(),
            document,
            expected,
            provisional: false,
        }
    }

    fn put_provisional(prefix: &str, document: BsonDocument) -> BatchCommand {
        BatchCommand::Put {
            id: prefix.to_string(),
            collection: "Characters".to_string(),
            document,
            expected: VersionCheck::Any,
            provisional: true,
        }
    }

    fn version_of(results: &[BatchResult], position: usize) -> Version {
        match &results[position] {
            BatchResult::Put { version, .. } => version.clone(),
            other => panic!("expected a put result, got {other:?}"),
        }
    }

    fn documents(result: &QueryResult) -> Vec<&StoredDocument> {
        result
            .hits
            .iter()
            .filter_map(|hit| match hit {
                QueryHit::Document(document) => Some(document),
                QueryHit::Entry(_) => None,
            })
            .collect()
    }

    fn by_class() -> IndexDefinition {
        IndexDefinition::builder("CharacterCountByClass")
            .map(
                MapDefinition::from_collection("Characters")
                    .field("ClassName", "Class.Name")
                    .constant("Count", 1),
            )
            .reduce(ReduceDefinition::group_by(["ClassName"]).sum("Count"))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn every_write_gets_a_new_version() {
        let store = manual_store().await;

        let first = store
            .commit_batch(vec![put("Characters/1", doc! { "Name": "Mike" }, VersionCheck::Missing)])
            .await
            .unwrap();
        let second = store
            .commit_batch(vec![put(
                "Characters/1",
                doc! { "Name": "Mike Keenan" },
                VersionCheck::Matches(version_of(&first, 0)),
            )])
            .await
            .unwrap();

        assert_ne!(version_of(&first, 0), version_of(&second, 0));

        let loaded = store
            .get_documents(vec!["Characters/1".to_string()], Vec::new())
            .await
            .unwrap();
        let document = loaded.results[0].as_ref().unwrap();
        assert_eq!(document.version, version_of(&second, 0));
        assert_eq!(document.body.get_str("Name").unwrap(), "Mike Keenan");
    }

    #[tokio::test]
    async fn a_failed_check_rejects_the_whole_batch() {
        let store = manual_store().await;
        store
            .commit_batch(vec![put("Characters/1", doc! { "Name": "Mike" }, VersionCheck::Any)])
            .await
            .unwrap();

        let err = store
            .commit_batch(vec![
                put("Characters/2", doc! { "Name": "Ann" }, VersionCheck::Missing),
                put("Characters/1", doc! { "Name": "Stale" }, VersionCheck::Missing),
            ])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DocumentStoreError::ConcurrencyConflict { ref id, expected: None, actual: Some(_) }
                if id == "Characters/1"
        ));
        assert_eq!(store.document_count().await, 1);
    }

    #[tokio::test]
    async fn provisional_ids_are_numbered_by_the_store() {
        let store = manual_store().await;

        let results = store
            .commit_batch(vec![
                put_provisional("Characters/", doc! { "Name": "A" }),
                put_provisional("Characters/", doc! { "Name": "B" }),
            ])
            .await
            .unwrap();

        let ids = results
            .iter()
            .map(|result| match result {
                BatchResult::Put { id, .. } => id.clone(),
                BatchResult::Delete { id } => id.clone(),
            })
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["Characters/1", "Characters/2"]);

        // numbers reserved by a range are never reused
        let range = store.next_identity_range("Characters").await.unwrap();
        assert_eq!(range, IdentityRange { low: 3, high: 34 });
    }

    #[tokio::test]
    async fn punctuated_ids_are_stored_as_given() {
        let store = manual_store().await;

        let results = store
            .commit_batch(vec![
                put("Characters/mike.", doc! { "Name": "Mike" }, VersionCheck::Missing),
                put("Characters/v1-", doc! { "Name": "Ann" }, VersionCheck::Missing),
                put("Characters/", doc! { "Name": "Slash" }, VersionCheck::Missing),
            ])
            .await
            .unwrap();

        let ids = results
            .iter()
            .map(|result| match result {
                BatchResult::Put { id, .. } => id.clone(),
                BatchResult::Delete { id } => id.clone(),
            })
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["Characters/mike.", "Characters/v1-", "Characters/"]);

        let loaded = store
            .get_documents(vec!["Characters/mike.".to_string()], Vec::new())
            .await
            .unwrap();
        assert!(loaded.results[0].is_some());
        assert_eq!(store.document_count().await, 3);
    }

    #[tokio::test]
    async fn indexes_are_stale_until_indexing_runs() {
        let store = manual_store().await;
        store.put_indexes(vec![by_class()]).await.unwrap();
        store
            .commit_batch(vec![put(
                "Characters/1",
                doc! { "Name": "Mike", "Class": { "Name": "Developer" } },
                VersionCheck::Any,
            )])
            .await
            .unwrap();

        assert!(store.is_index_stale("CharacterCountByClass").await.unwrap());

        let stale = store
            .query_documents(Query::builder().index("CharacterCountByClass").build())
            .await
            .unwrap();
        assert!(stale.statistics.is_stale);
        assert!(stale.hits.is_empty());

        store.run_indexing().await;
        assert!(!store.is_index_stale("CharacterCountByClass").await.unwrap());
    }

    #[tokio::test]
    async fn waiting_queries_see_every_prior_write() {
        let store = manual_store().await;
        store.put_indexes(vec![by_class()]).await.unwrap();
        store
            .commit_batch(vec![
                put("Characters/1", doc! { "Class": { "Name": "Developer" } }, VersionCheck::Any),
                put("Characters/2", doc! { "Class": { "Name": "Developer" } }, VersionCheck::Any),
                put("Characters/3", doc! { "Class": { "Name": "Tester" } }, VersionCheck::Any),
            ])
            .await
            .unwrap();

        let result = store
            .query_documents(
                Query::builder()
                    .index("CharacterCountByClass")
                    .sort("ClassName", SortDirection::Asc)
                    .wait_for_non_stale(std::time::Duration::from_secs(5))
                    .build(),
            )
            .await
            .unwrap();

        assert!(!result.statistics.is_stale);
        assert_eq!(
            result.hits,
            vec![
                QueryHit::Entry(doc! { "ClassName": "Developer", "Count": 2 }),
                QueryHit::Entry(doc! { "ClassName": "Tester", "Count": 1 }),
            ]
        );
    }

    #[tokio::test]
    async fn map_only_indexes_return_source_documents() {
        let store = manual_store().await;
        let by_attack = IndexDefinition::builder("Characters/ByItemAttack")
            .map(
                MapDefinition::from_collection("Characters")
                    .for_each("Inventory")
                    .element("Attack", "Attack"),
            )
            .build()
            .unwrap();
        store.put_indexes(vec![by_attack]).await.unwrap();
        store
            .commit_batch(vec![
                put(
                    "Characters/1",
                    doc! { "Inventory": [{ "Attack": 1 }, { "Attack": 50 }, { "Attack": 9 }] },
                    VersionCheck::Any,
                ),
                put("Characters/2", doc! { "Inventory": [{ "Attack": 2 }] }, VersionCheck::Any),
            ])
            .await
            .unwrap();
        store.run_indexing().await;

        let result = store
            .query_documents(
                Query::builder()
                    .index("Characters/ByItemAttack")
                    .filter(Filter::gt("Attack", 5))
                    .build(),
            )
            .await
            .unwrap();

        let ids = documents(&result).into_iter().map(|doc| doc.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["Characters/1"]);
        assert_eq!(result.statistics.total_results, 1);
    }

    #[tokio::test]
    async fn filters_without_an_index_create_an_automatic_one() {
        let store = manual_store().await;
        store
            .commit_batch(vec![
                put("Characters/1", doc! { "Name": "Mike" }, VersionCheck::Any),
                put("Characters/2", doc! { "Name": "Ann" }, VersionCheck::Any),
            ])
            .await
            .unwrap();

        let result = store
            .query_documents(
                Query::builder()
                    .collection("Characters")
                    .filter(Filter::eq("Name", "Ann"))
                    .build(),
            )
            .await
            .unwrap();

        assert_eq!(result.statistics.index_name, "Auto/Characters/ByName");
        assert_eq!(documents(&result)[0].id, "Characters/2");
        assert!(!store.is_index_stale("Auto/Characters/ByName").await.unwrap());
    }

    #[tokio::test]
    async fn collection_scans_page_after_counting() {
        let store = manual_store().await;
        let commands = (1..=5)
            .map(|n| put(&format!("Characters/{n}"), doc! { "Rank": n }, VersionCheck::Any))
            .collect();
        store.commit_batch(commands).await.unwrap();

        let result = store
            .query_documents(
                Query::builder()
                    .collection("Characters")
                    .sort("Rank", SortDirection::Desc)
                    .offset(1)
                    .limit(2)
                    .build(),
            )
            .await
            .unwrap();

        let ids = documents(&result).into_iter().map(|doc| doc.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["Characters/4", "Characters/3"]);
        assert_eq!(result.statistics.total_results, 5);
        assert_eq!(result.statistics.index_name, "Collection/Characters");
    }

    #[tokio::test]
    async fn unknown_indexes_are_reported() {
        let store = manual_store().await;

        let err = store
            .query_documents(Query::builder().index("Nope").build())
            .await
            .unwrap_err();

        assert!(matches!(err, DocumentStoreError::IndexNotFound(name) if name == "Nope"));
    }

    #[tokio::test]
    async fn loads_resolve_include_paths() {
        let store = manual_store().await;
        store
            .commit_batch(vec![
                put("Characters/1", doc! { "SiblingId": "Characters/2" }, VersionCheck::Any),
                put("Characters/2", doc! { "SiblingId": "Characters/9" }, VersionCheck::Any),
            ])
            .await
            .unwrap();

        let loaded = store
            .get_documents(
                vec!["Characters/1".to_string(), "Characters/7".to_string()],
                vec!["SiblingId".to_string()],
            )
            .await
            .unwrap();

        assert!(loaded.results[0].is_some());
        assert!(loaded.results[1].is_none());
        assert_eq!(loaded.includes.len(), 1);
        assert_eq!(loaded.includes[0].id, "Characters/2");
    }

    #[tokio::test]
    async fn patches_are_atomic_and_bump_the_version() {
        let store = manual_store().await;
        let results = store
            .commit_batch(vec![put(
                "Characters/1",
                doc! { "Inventory": ["Old Boot"], "Level": 1 },
                VersionCheck::Any,
            )])
            .await
            .unwrap();

        let version = store
            .patch_document(
                "Characters/1",
                vec![
                    PatchOperation::add("Inventory", "Sword"),
                    PatchOperation::inc("Level", 2),
                ],
            )
            .await
            .unwrap();
        assert_ne!(version, version_of(&results, 0));

        let err = store
            .patch_document(
                "Characters/1",
                vec![
                    PatchOperation::set("Level", 10),
                    PatchOperation::add("Level", "not an array"),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::InvalidPatch(_)));

        let loaded = store
            .get_documents(vec!["Characters/1".to_string()], Vec::new())
            .await
            .unwrap();
        let body = &loaded.results[0].as_ref().unwrap().body;
        assert_eq!(body, &doc! { "Inventory": ["Old Boot", "Sword"], "Level": 3 });

        let err = store
            .patch_document("Characters/404", vec![PatchOperation::unset("Level")])
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::DocumentNotFound(_)));
    }

    #[tokio::test]
    async fn attachments_replace_data_and_metadata() {
        let store = manual_store().await;
        let metadata = AttachmentMetadata::from([("Description".to_string(), "Boot".to_string())]);

        store
            .put_attachment("images/1", vec![1, 2, 3], metadata)
            .await
            .unwrap();
        store
            .put_attachment("images/1", vec![4, 5], AttachmentMetadata::new())
            .await
            .unwrap();

        let attachment = store.get_attachment("images/1").await.unwrap().unwrap();
        assert_eq!(attachment.data, vec![4, 5]);
        assert_eq!(attachment.size, 2);
        assert!(attachment.metadata.is_empty());

        store.delete_attachment("images/1").await.unwrap();
        assert!(store.get_attachment("images/1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn registration_is_idempotent() {
        let store = manual_store().await;

        let first = store.put_indexes(vec![by_class()]).await.unwrap();
        let second = store.put_indexes(vec![by_class()]).await.unwrap();

        let changed = IndexDefinition::builder("CharacterCountByClass")
            .map(
                MapDefinition::from_collection("Characters")
                    .field("ClassName", "ClassName")
                    .constant("Count", 1),
            )
            .reduce(ReduceDefinition::group_by(["ClassName"]).sum("Count"))
            .build()
            .unwrap();
        let third = store.put_indexes(vec![changed]).await.unwrap();

        assert_eq!(first[0].outcome, IndexOutcome::Created);
        assert_eq!(second[0].outcome, IndexOutcome::Unchanged);
        assert_eq!(third[0].outcome, IndexOutcome::Updated);
    }

    #[tokio::test]
    async fn background_indexing_catches_up() {
        let store = InMemoryStore::new();
        store.put_indexes(vec![by_class()]).await.unwrap();
        store
            .commit_batch(vec![put(
                "Characters/1",
                doc! { "Class": { "Name": "Developer" } },
                VersionCheck::Any,
            )])
            .await
            .unwrap();

        let mut stale = true;
        for _ in 0..200 {
            if !store.is_index_stale("CharacterCountByClass").await.unwrap() {
                stale = false;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        assert!(!stale);
        store.close().await.unwrap();
    }
}
