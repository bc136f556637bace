//! The unit of work.
//!
//! A [`Session`] tracks every entity it loads or stores in an identity map, stages writes
//! locally, and sends them to the store as one atomic batch in
//! [`save_changes`](Session::save_changes). Reads go to the store at most once per load
//! batch or query; anything already known to the session is answered locally.
//!
//! Entities come back as [`Tracked`] handles. All handles for one identity within a
//! session share the same instance, so a change made through one is seen through all of
//! them and picked up by the next `save_changes`.
//!
//! ```ignore
//! let mut session = store.open_session()?;
//!
//! let mike = session
//!     .store(Character::new("Mike Keenan", "Developer", "Human"))
//!     .await?;
//! session.save_changes().await?;
//!
//! let mut session = store.open_session()?;
//! let loaded = session.load::<Character>("Characters/1").await?;
//! ```

use bson::{Document as BsonDocument, de::deserialize_from_bson};
use std::{
    any::Any,
    collections::{HashMap, HashSet},
    marker::PhantomData,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};
use tracing::{debug, trace, warn};

use crate::{
    backend::{BatchCommand, BatchResult, QueryHit, StoreBackend, VersionCheck},
    conventions::Conventions,
    document::{Document, DocumentExt, StoredDocument, Version, referenced_ids},
    error::{DocumentStoreError, DocumentStoreResult},
    identity::is_provisional,
    index::Index,
    page::{Page, PaginationParams, QueryResults},
    query::{Expr, Projection, Query, QueryBuilder, SortDirection},
    store::DocumentStore,
};

/// Shared handle to an entity held in a session's identity map.
#[derive(Debug)]
pub struct Tracked<T> {
    inner: Arc<RwLock<T>>,
}

impl<T> Clone for Tracked<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T> Tracked<T> {
    fn new(value: T) -> Self {
        Self { inner: Arc::new(RwLock::new(value)) }
    }

    /// Locks the entity for reading.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the entity for writing. Changes are detected at the next `save_changes`.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `true` if both handles point at the same tracked instance.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone> Tracked<T> {
    /// Returns a copy of the current value.
    pub fn snapshot(&self) -> T {
        self.read().clone()
    }
}

trait TrackedEntity: Send + Sync {
    fn id(&self) -> Option<String>;
    fn collection(&self) -> &'static str;
    fn to_document(&self) -> DocumentStoreResult<BsonDocument>;
    fn assign_id(&self, id: String);
    fn as_any(&self) -> &dyn Any;
}

impl<T: Document> TrackedEntity for Tracked<T> {
    fn id(&self) -> Option<String> {
        self.read().id().map(str::to_string)
    }

    fn collection(&self) -> &'static str {
        T::collection_name()
    }

    fn to_document(&self) -> DocumentStoreResult<BsonDocument> {
        self.read().to_document()
    }

    fn assign_id(&self, id: String) {
        self.write().set_id(id);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct Entry {
    entity: Box<dyn TrackedEntity>,
    /// Version last seen from the store; `None` until the entity has been loaded or saved.
    version: Option<Version>,
    /// Body as last seen from the store, used to detect modifications.
    original: Option<BsonDocument>,
    /// Check to commit with instead of the one derived from `version`.
    forced: Option<VersionCheck>,
    seq: u64,
}

impl Entry {
    fn typed<T: Document>(&self, id: &str) -> DocumentStoreResult<Tracked<T>> {
        self.entity
            .as_any()
            .downcast_ref::<Tracked<T>>()
            .cloned()
            .ok_or_else(|| {
                DocumentStoreError::InvalidDocument(format!(
                    "{id} is tracked as a {} entity, not {}",
                    self.entity.collection(),
                    T::collection_name()
                ))
            })
    }

    fn is_modified(&self) -> bool {
        if self.forced.is_some() {
            return true;
        }

        match (&self.original, self.entity.to_document()) {
            (Some(original), Ok(current)) => *original != current,
            _ => true,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingDelete {
    id: String,
    expected: VersionCheck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    /// `save_changes` succeeded.
    Committed,
    Disposed,
}

enum Local<T> {
    Hit(Tracked<T>),
    Missing,
    Unknown,
}

enum Target {
    Tracked(String),
    Provisional(usize),
}

/// A unit of work over a [`DocumentStore`].
///
/// Sessions are single-owner and short-lived: open one, load and change entities, call
/// [`save_changes`](Self::save_changes) once. After a successful commit or
/// [`dispose`](Self::dispose) every operation fails with
/// [`DocumentStoreError::SessionClosed`].
pub struct Session<B: StoreBackend> {
    store: DocumentStore<B>,
    conventions: Conventions,
    state: SessionState,
    entities: HashMap<String, Entry>,
    /// Entities waiting for the store to number them, with the prefix they were stored under.
    provisional: Vec<(String, Entry)>,
    pending_deletes: Vec<PendingDelete>,
    included: HashMap<String, StoredDocument>,
    known_missing: HashSet<String>,
    requests: usize,
    next_seq: u64,
}

impl<B: StoreBackend> Session<B> {
    pub(crate) fn new(store: DocumentStore<B>, conventions: Conventions) -> Self {
        Self {
            store,
            conventions,
            state: SessionState::Open,
            entities: HashMap::new(),
            provisional: Vec::new(),
            pending_deletes: Vec::new(),
            included: HashMap::new(),
            known_missing: HashSet::new(),
            requests: 0,
            next_seq: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Round trips this session has made to the store.
    pub fn number_of_requests(&self) -> usize {
        self.requests
    }

    /// Returns `true` if `id` is in the identity map.
    pub fn is_loaded(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    /// Returns the version the session last saw for `id`.
    pub fn version_of(&self, id: &str) -> Option<Version> {
        self.entities.get(id).and_then(|entry| entry.version.clone())
    }

    /// Returns `true` if `save_changes` would send anything.
    pub fn has_changes(&self) -> bool {
        !self.pending_deletes.is_empty()
            || !self.provisional.is_empty()
            || self.entities.values().any(Entry::is_modified)
    }

    fn ensure_open(&self) -> DocumentStoreResult<()> {
        if self.state != SessionState::Open {
            return Err(DocumentStoreError::SessionClosed);
        }

        self.store.ensure_open()
    }

    fn begin_request(&mut self) -> DocumentStoreResult<()> {
        let max = self.conventions.max_requests_per_session;
        if self.requests >= max {
            return Err(DocumentStoreError::RequestLimitExceeded(max));
        }

        self.requests += 1;
        Ok(())
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn is_deleted(&self, id: &str) -> bool {
        self.pending_deletes.iter().any(|delete| delete.id == id)
    }

    fn is_known(&self, id: &str) -> bool {
        self.entities.contains_key(id)
            || self.included.contains_key(id)
            || self.known_missing.contains(id)
            || self.is_deleted(id)
    }

    fn local<T: Document>(&mut self, id: &str) -> DocumentStoreResult<Local<T>> {
        if self.is_deleted(id) {
            return Ok(Local::Missing);
        }
        if let Some(entry) = self.entities.get(id) {
            return entry.typed::<T>(id).map(Local::Hit);
        }
        if let Some(stored) = self.included.remove(id) {
            return self.track_stored::<T>(stored).map(Local::Hit);
        }
        if self.known_missing.contains(id) {
            return Ok(Local::Missing);
        }

        Ok(Local::Unknown)
    }

    fn track_stored<T: Document>(&mut self, stored: StoredDocument) -> DocumentStoreResult<Tracked<T>> {
        if let Some(entry) = self.entities.get(&stored.id) {
            return entry.typed::<T>(&stored.id);
        }

        let entity: T = stored.materialize()?;
        let original = entity.to_document()?;
        let tracked = Tracked::new(entity);
        let seq = self.next_seq();

        self.known_missing.remove(&stored.id);
        self.entities.insert(
            stored.id,
            Entry {
                entity: Box::new(tracked.clone()),
                version: Some(stored.version),
                original: Some(original),
                forced: None,
                seq,
            },
        );

        Ok(tracked)
    }

    fn absorb_includes(&mut self, includes: Vec<StoredDocument>) {
        for stored in includes {
            if self.entities.contains_key(&stored.id) || self.is_deleted(&stored.id) {
                continue;
            }

            self.known_missing.remove(&stored.id);
            self.included.insert(stored.id.clone(), stored);
        }
    }

    /// Loads one entity, or `None` if it does not exist.
    ///
    /// Entities already in the identity map or fetched through an include are returned
    /// without contacting the store.
    pub async fn load<T: Document>(&mut self, id: &str) -> DocumentStoreResult<Option<Tracked<T>>> {
        let mut loaded = self.load_with_includes::<T>(&[id], &[]).await?;

        Ok(loaded.pop().flatten())
    }

    /// Loads several entities in at most one round trip. Results follow `ids`.
    pub async fn load_many<T: Document>(
        &mut self,
        ids: &[&str],
    ) -> DocumentStoreResult<Vec<Option<Tracked<T>>>> {
        self.load_with_includes::<T>(ids, &[]).await
    }

    /// Starts a load that also fetches the documents referenced at `path`.
    pub fn include(&mut self, path: impl Into<String>) -> IncludeLoader<'_, B> {
        IncludeLoader {
            session: self,
            includes: vec![path.into()],
        }
    }

    async fn load_with_includes<T: Document>(
        &mut self,
        ids: &[&str],
        includes: &[String],
    ) -> DocumentStoreResult<Vec<Option<Tracked<T>>>> {
        self.ensure_open()?;

        let mut slots = Vec::with_capacity(ids.len());
        let mut unknown = Vec::new();
        for id in ids {
            match self.local::<T>(id)? {
                Local::Hit(tracked) => slots.push(Some(tracked)),
                Local::Missing => slots.push(None),
                Local::Unknown => {
                    if !unknown.iter().any(|known: &String| known == id) {
                        unknown.push(id.to_string());
                    }
                    slots.push(None);
                }
            }
        }

        // references of entities we already hold still need fetching
        let mut referenced = Vec::new();
        for tracked in slots.iter().flatten() {
            let document = tracked.read().to_document()?;
            for path in includes {
                for id in referenced_ids(&document, path) {
                    if !self.is_known(&id) && !unknown.contains(&id) && !referenced.contains(&id) {
                        referenced.push(id);
                    }
                }
            }
        }

        if unknown.is_empty() && referenced.is_empty() {
            return Ok(slots);
        }

        self.begin_request()?;
        trace!(ids = ?unknown, includes = ?includes, "loading documents");

        let request = unknown.iter().chain(referenced.iter()).cloned().collect::<Vec<_>>();
        let response = self
            .store
            .backend()
            .get_documents(request, includes.to_vec())
            .await?;

        let mut results = response.results.into_iter();
        for id in &unknown {
            match results.next().flatten() {
                Some(stored) => {
                    self.track_stored::<T>(stored)?;
                }
                None => {
                    self.known_missing.insert(id.clone());
                }
            }
        }
        for id in &referenced {
            match results.next().flatten() {
                Some(stored) => self.absorb_includes(vec![stored]),
                None => {
                    self.known_missing.insert(id.clone());
                }
            }
        }
        self.absorb_includes(response.includes);

        for (slot, id) in slots.iter_mut().zip(ids) {
            if slot.is_none() && unknown.iter().any(|known| known == id) {
                *slot = match self.entities.get(*id) {
                    Some(entry) => Some(entry.typed::<T>(id)?),
                    None => None,
                };
            }
        }

        Ok(slots)
    }

    /// Stages `entity` for saving and starts tracking it.
    ///
    /// An entity without an identity gets the next one for its collection immediately.
    /// An identity ending with the separator (`"Characters/"`) is completed by the store
    /// at commit. Storing an identity that is already tracked replaces the tracked value
    /// and returns the existing handle; storing an identity staged for deletion cancels
    /// the deletion.
    pub async fn store<T: Document>(&mut self, mut entity: T) -> DocumentStoreResult<Tracked<T>> {
        self.ensure_open()?;

        let id = match entity.id() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                let id = self.store.next_identity(T::collection_name()).await?;
                entity.set_id(id.clone());
                id
            }
        };

        let seq = self.next_seq();

        if is_provisional(&id, self.conventions.identity_separator) {
            let tracked = Tracked::new(entity);
            self.provisional.push((
                id,
                Entry {
                    entity: Box::new(tracked.clone()),
                    version: None,
                    original: None,
                    forced: None,
                    seq,
                },
            ));
            return Ok(tracked);
        }

        if let Some(entry) = self.entities.get(&id) {
            let tracked = entry.typed::<T>(&id)?;
            *tracked.write() = entity;
            return Ok(tracked);
        }

        let mut forced = None;
        if let Some(position) = self.pending_deletes.iter().position(|delete| delete.id == id) {
            forced = Some(self.pending_deletes.remove(position).expected);
        } else if let Some(stored) = self.included.remove(&id) {
            forced = Some(VersionCheck::Matches(stored.version));
        }
        self.known_missing.remove(&id);

        let tracked = Tracked::new(entity);
        self.entities.insert(
            id,
            Entry {
                entity: Box::new(tracked.clone()),
                version: None,
                original: None,
                forced,
                seq,
            },
        );

        Ok(tracked)
    }

    /// Stages `entity` for saving, committed only if the stored version equals `version`.
    pub async fn store_with_version<T: Document>(
        &mut self,
        entity: T,
        version: Version,
    ) -> DocumentStoreResult<Tracked<T>> {
        let tracked = self.store(entity).await?;

        let id = tracked.read().id().map(str::to_string);
        match id.and_then(|id| self.entities.get_mut(&id)) {
            Some(entry) => {
                entry.forced = Some(VersionCheck::Matches(version));
                Ok(tracked)
            }
            None => Err(DocumentStoreError::InvalidDocument(
                "a provisional identity cannot carry an expected version".to_string(),
            )),
        }
    }

    /// Stages the document with identity `id` for deletion.
    ///
    /// The entity leaves the identity map at once; loading it again in this session
    /// returns `None`.
    pub fn delete(&mut self, id: &str) -> DocumentStoreResult<()> {
        self.ensure_open()?;

        let expected = match self.entities.remove(id) {
            Some(Entry { forced: Some(check), .. }) => check,
            Some(Entry { version: Some(version), .. })
                if self.conventions.use_optimistic_concurrency =>
            {
                VersionCheck::Matches(version)
            }
            _ => VersionCheck::Any,
        };

        self.included.remove(id);
        self.known_missing.remove(id);
        if !self.is_deleted(id) {
            self.pending_deletes.push(PendingDelete { id: id.to_string(), expected });
        }

        Ok(())
    }

    /// Stages a tracked entity for deletion.
    pub fn delete_entity<T: Document>(&mut self, entity: &Tracked<T>) -> DocumentStoreResult<()> {
        self.ensure_open()?;

        let position = self.provisional.iter().position(|(_, entry)| {
            entry
                .entity
                .as_any()
                .downcast_ref::<Tracked<T>>()
                .is_some_and(|tracked| tracked.ptr_eq(entity))
        });
        if let Some(position) = position {
            self.provisional.remove(position);
            return Ok(());
        }

        let id = entity.read().id().map(str::to_string);
        match id {
            Some(id) => self.delete(&id),
            None => Err(DocumentStoreError::InvalidDocument(format!(
                "cannot delete a {} entity without an identity",
                T::collection_name()
            ))),
        }
    }

    /// Starts a query over the documents of `T`'s collection.
    pub fn query<T: Document>(&mut self) -> DocumentQuery<'_, B, T> {
        DocumentQuery {
            builder: Query::builder().collection(T::collection_name()),
            session: self,
            _entity: PhantomData,
        }
    }

    /// Starts a query returning the entries of index `I`.
    pub fn query_index<I: Index>(&mut self) -> IndexQuery<'_, B, I> {
        IndexQuery {
            builder: Query::builder()
                .index(I::NAME)
                .projection(Projection::IndexEntries),
            session: self,
            _index: PhantomData,
        }
    }

    /// Sends every staged change to the store in one atomic batch.
    ///
    /// Deletions go first, in the order they were staged, followed by new and modified
    /// entities. Nothing is sent if nothing changed. On success the session is committed;
    /// on failure it stays open with every change still staged.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::ConcurrencyConflict`] if any document moved on since
    /// the session saw it. Nothing in the batch is applied in that case.
    pub async fn save_changes(&mut self) -> DocumentStoreResult<()> {
        self.ensure_open()?;

        let mut commands = self
            .pending_deletes
            .iter()
            .map(|delete| BatchCommand::Delete {
                id: delete.id.clone(),
                expected: delete.expected.clone(),
            })
            .collect::<Vec<_>>();
        let deletes = commands.len();

        let mut writes = Vec::new();
        for (id, entry) in &self.entities {
            if entry.is_modified() {
                writes.push((entry.seq, Target::Tracked(id.clone()), entry));
            }
        }
        for (index, (_, entry)) in self.provisional.iter().enumerate() {
            writes.push((entry.seq, Target::Provisional(index), entry));
        }
        writes.sort_by_key(|(seq, _, _)| *seq);

        let mut targets = Vec::with_capacity(writes.len());
        let mut documents = Vec::with_capacity(writes.len());
        for (_, target, entry) in writes {
            let document = entry.entity.to_document()?;
            let (id, expected, provisional) = match &target {
                Target::Tracked(id) => (id.clone(), self.expected_for(entry), false),
                Target::Provisional(index) => {
                    (self.provisional[*index].0.clone(), VersionCheck::Any, true)
                }
            };

            commands.push(BatchCommand::Put {
                id,
                collection: entry.entity.collection().to_string(),
                document: document.clone(),
                expected,
                provisional,
            });
            targets.push(target);
            documents.push(document);
        }

        if commands.is_empty() {
            debug!("no changes to save");
            self.state = SessionState::Committed;
            return Ok(());
        }

        self.begin_request()?;
        debug!(
            deletes,
            puts = commands.len() - deletes,
            "saving changes"
        );

        let results = self.store.backend().commit_batch(commands).await?;
        if results.len() != deletes + targets.len() {
            return Err(DocumentStoreError::Backend(format!(
                "store answered {} results for {} commands",
                results.len(),
                deletes + targets.len()
            )));
        }

        for (result, target) in results.iter().skip(deletes).zip(&targets) {
            match (result, target) {
                (BatchResult::Put { id, .. }, Target::Tracked(key)) if id != key => {
                    return Err(DocumentStoreError::Backend(format!(
                        "store saved {key} under {id}"
                    )));
                }
                (BatchResult::Put { .. }, _) => {}
                (BatchResult::Delete { id }, _) => {
                    return Err(DocumentStoreError::Backend(format!(
                        "store answered a delete of {id} to a put"
                    )));
                }
            }
        }

        let mut provisional = std::mem::take(&mut self.provisional)
            .into_iter()
            .map(|(_, entry)| Some(entry))
            .collect::<Vec<_>>();

        for ((result, target), document) in results
            .into_iter()
            .skip(deletes)
            .zip(targets)
            .zip(documents)
        {
            let BatchResult::Put { id, version } = result else {
                continue;
            };

            match target {
                Target::Tracked(key) => {
                    if let Some(entry) = self.entities.get_mut(&key) {
                        entry.version = Some(version);
                        entry.original = Some(document);
                        entry.forced = None;
                    }
                }
                Target::Provisional(index) => {
                    if let Some(mut entry) = provisional.get_mut(index).and_then(Option::take) {
                        entry.entity.assign_id(id.clone());
                        entry.original = entry.entity.to_document().ok();
                        entry.version = Some(version);
                        self.entities.insert(id, entry);
                    }
                }
            }
        }

        self.pending_deletes.clear();
        self.state = SessionState::Committed;

        Ok(())
    }

    fn expected_for(&self, entry: &Entry) -> VersionCheck {
        if let Some(check) = &entry.forced {
            return check.clone();
        }

        match (&entry.version, self.conventions.use_optimistic_concurrency) {
            (_, false) => VersionCheck::Any,
            (Some(version), true) => VersionCheck::Matches(version.clone()),
            (None, true) => VersionCheck::Missing,
        }
    }

    /// Ends the session, discarding anything staged. Calling it again is a no-op.
    pub fn dispose(&mut self) {
        if self.state == SessionState::Open && self.has_changes() {
            warn!("session disposed with unsaved changes");
        }

        self.state = SessionState::Disposed;
        self.entities.clear();
        self.provisional.clear();
        self.pending_deletes.clear();
        self.included.clear();
        self.known_missing.clear();
    }
}

impl<B: StoreBackend> Drop for Session<B> {
    fn drop(&mut self) {
        if self.state == SessionState::Open && self.has_changes() {
            warn!(
                deletes = self.pending_deletes.len(),
                "session dropped with unsaved changes"
            );
        }
    }
}

/// Load builder returned by [`Session::include`].
pub struct IncludeLoader<'a, B: StoreBackend> {
    session: &'a mut Session<B>,
    includes: Vec<String>,
}

impl<'a, B: StoreBackend> IncludeLoader<'a, B> {
    /// Also fetches the documents referenced at `path`.
    pub fn include(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        if !self.includes.contains(&path) {
            self.includes.push(path);
        }
        self
    }

    pub async fn load<T: Document>(self, id: &str) -> DocumentStoreResult<Option<Tracked<T>>> {
        let mut loaded = self
            .session
            .load_with_includes::<T>(&[id], &self.includes)
            .await?;

        Ok(loaded.pop().flatten())
    }

    pub async fn load_many<T: Document>(
        self,
        ids: &[&str],
    ) -> DocumentStoreResult<Vec<Option<Tracked<T>>>> {
        self.session.load_with_includes::<T>(ids, &self.includes).await
    }
}

/// A lazily executed query returning tracked entities.
pub struct DocumentQuery<'a, B: StoreBackend, T: Document> {
    session: &'a mut Session<B>,
    builder: QueryBuilder,
    _entity: PhantomData<T>,
}

impl<'a, B: StoreBackend, T: Document> DocumentQuery<'a, B, T> {
    /// Runs against the named index instead of an automatic one.
    pub fn using_index(mut self, name: impl Into<String>) -> Self {
        self.builder = self.builder.index(name);
        self
    }

    pub fn using<I: Index>(self) -> Self {
        self.using_index(I::NAME)
    }

    /// Adds a predicate; repeated calls are combined with AND.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.builder = self.builder.filter(expr);
        self
    }

    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.builder = self.builder.sort(field, direction);
        self
    }

    pub fn skip(mut self, count: usize) -> Self {
        self.builder = self.builder.offset(count);
        self
    }

    pub fn take(mut self, count: usize) -> Self {
        self.builder = self.builder.limit(count);
        self
    }

    pub fn include(mut self, path: impl Into<String>) -> Self {
        self.builder = self.builder.include(path);
        self
    }

    /// Asks the store to let the index catch up before answering.
    ///
    /// `timeout` is passed along with the query and how it is honoured is up to the
    /// backend. The in-memory store ignores it and reindexes inline, so its answer is
    /// never stale. A remote server may give up after `timeout` and answer stale, or fail;
    /// check [`QueryResults::is_stale`] rather than assuming either.
    pub fn wait_for_non_stale_results(mut self, timeout: Duration) -> Self {
        self.builder = self.builder.wait_for_non_stale(timeout);
        self
    }

    /// Executes the query. Results already in the identity map keep their local instance.
    pub async fn execute(self) -> DocumentStoreResult<QueryResults<Tracked<T>>> {
        let session = self.session;
        session.ensure_open()?;

        let query = self.builder.build();
        let index = query.index.clone();
        session.begin_request()?;
        trace!(?query, "querying documents");

        let result = session.store.backend().query_documents(query).await?;
        session.absorb_includes(result.includes);

        let mut items = Vec::with_capacity(result.hits.len());
        for hit in result.hits {
            match hit {
                QueryHit::Document(stored) => {
                    if session.is_deleted(&stored.id) {
                        continue;
                    }
                    items.push(session.track_stored::<T>(stored)?);
                }
                QueryHit::Entry(_) => {
                    return Err(DocumentStoreError::InvalidDocument(format!(
                        "index {} answers with index entries; use query_index",
                        index.unwrap_or_default()
                    )));
                }
            }
        }

        Ok(QueryResults {
            items,
            statistics: result.statistics,
        })
    }

    /// Executes the query and returns its first result.
    pub async fn first(self) -> DocumentStoreResult<Option<Tracked<T>>> {
        Ok(self.take(1).execute().await?.into_iter().next())
    }

    /// Executes the query for one page of results.
    pub async fn page(self, params: &PaginationParams) -> DocumentStoreResult<Page<Tracked<T>>> {
        let results = self
            .skip(params.offset())
            .take(params.per_page)
            .execute()
            .await?;
        let total = results.statistics.total_results;

        Ok(params.page_of(results.items, total))
    }
}

/// A lazily executed query over the entries of index `I`. Results are not tracked.
pub struct IndexQuery<'a, B: StoreBackend, I: Index> {
    session: &'a mut Session<B>,
    builder: QueryBuilder,
    _index: PhantomData<I>,
}

impl<'a, B: StoreBackend, I: Index> IndexQuery<'a, B, I> {
    pub fn filter(mut self, expr: Expr) -> Self {
        self.builder = self.builder.filter(expr);
        self
    }

    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.builder = self.builder.sort(field, direction);
        self
    }

    pub fn skip(mut self, count: usize) -> Self {
        self.builder = self.builder.offset(count);
        self
    }

    pub fn take(mut self, count: usize) -> Self {
        self.builder = self.builder.limit(count);
        self
    }

    /// See [`DocumentQuery::wait_for_non_stale_results`].
    pub fn wait_for_non_stale_results(mut self, timeout: Duration) -> Self {
        self.builder = self.builder.wait_for_non_stale(timeout);
        self
    }

    pub async fn execute(self) -> DocumentStoreResult<QueryResults<I::Result>> {
        let session = self.session;
        session.ensure_open()?;

        let query = self.builder.build();
        session.begin_request()?;
        trace!(index = I::NAME, ?query, "querying index entries");

        let result = session.store.backend().query_documents(query).await?;

        let items = result
            .hits
            .into_iter()
            .map(|hit| {
                let entry = match hit {
                    QueryHit::Entry(entry) => entry,
                    QueryHit::Document(stored) => stored.body,
                };
                Ok(deserialize_from_bson(bson::Bson::Document(entry))?)
            })
            .collect::<DocumentStoreResult<Vec<_>>>()?;

        Ok(QueryResults {
            items,
            statistics: result.statistics,
        })
    }

    pub async fn first(self) -> DocumentStoreResult<Option<I::Result>> {
        Ok(self.take(1).execute().await?.into_iter().next())
    }
}
