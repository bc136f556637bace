//! Main document store interface for interacting with document backends.
//!
//! [`DocumentStore`] is the process-wide handle over one backend. It is cheap to clone and
//! shared across tasks; everything document-shaped goes through the [`Session`]s it opens,
//! while attachments, patches and index registration go straight to the backend.
//!
//! # Example
//!
//! ```ignore
//! use docsession::store::DocumentStore;
//!
//! let store = DocumentStore::new(backend);
//! store.execute_index::<CharactersByName>().await?;
//!
//! let mut session = store.open_session()?;
//! let character = session.load::<Character>("Characters/1").await?;
//! ```

use std::{
    any::Any,
    io::Read,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tracing::{debug, info};

use crate::{
    attachment::{Attachment, AttachmentMetadata},
    backend::{DynStoreBackend, StoreBackend},
    conventions::{Conventions, SessionOptions},
    document::Version,
    error::{DocumentStoreError, DocumentStoreResult},
    identity::HiLoIdentityGenerator,
    index::{Index, IndexDefinition, IndexRegistration},
    patch::PatchOperation,
    session::Session,
};

/// A document store handle bound to a specific backend implementation.
///
/// Clones share the backend, the conventions, the identity generator and the disposed
/// flag. Once any clone is disposed every clone refuses further work.
///
/// # Type Parameters
///
/// * `B` - The backend implementation type
#[derive(Debug)]
pub struct DocumentStore<B: StoreBackend> {
    inner: Arc<StoreInner<B>>,
}

#[derive(Debug)]
struct StoreInner<B: StoreBackend> {
    backend: B,
    conventions: Conventions,
    identities: HiLoIdentityGenerator,
    disposed: AtomicBool,
}

/// A store whose backend was chosen at runtime.
pub type DynDocumentStore = DocumentStore<Box<dyn DynStoreBackend>>;

impl<B: StoreBackend> Clone for DocumentStore<B> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<B: StoreBackend> DocumentStore<B> {
    /// Creates a new document store with the given backend and default conventions.
    pub fn new(backend: B) -> Self {
        Self::with_conventions(backend, Conventions::default())
    }

    /// Creates a new document store with the given backend and conventions.
    pub fn with_conventions(backend: B, conventions: Conventions) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                backend,
                conventions,
                identities: HiLoIdentityGenerator::new(),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    pub fn conventions(&self) -> &Conventions {
        &self.inner.conventions
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_open(&self) -> DocumentStoreResult<()> {
        if self.is_disposed() {
            return Err(DocumentStoreError::StoreDisposed);
        }

        Ok(())
    }

    /// Opens a new unit of work using the store's conventions.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::StoreDisposed`] after [`dispose`](Self::dispose).
    pub fn open_session(&self) -> DocumentStoreResult<Session<B>> {
        self.open_session_with(SessionOptions::default())
    }

    /// Opens a new unit of work with per-session overrides.
    pub fn open_session_with(&self, options: SessionOptions) -> DocumentStoreResult<Session<B>> {
        self.ensure_open()?;

        Ok(Session::new(
            self.clone(),
            self.inner.conventions.with_overrides(&options),
        ))
    }

    /// Marks the handle disposed and closes the backend.
    ///
    /// Disposing twice is a no-op. Sessions opened earlier fail on their next call.
    pub async fn dispose(&self) -> DocumentStoreResult<()> {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        info!("disposing document store");
        self.inner.backend.close().await
    }

    /// Registers index definitions with the store.
    ///
    /// Registration is idempotent: a definition identical to the registered one is left
    /// alone, a changed one resets the index.
    pub async fn register_indexes(
        &self,
        definitions: Vec<IndexDefinition>,
    ) -> DocumentStoreResult<Vec<IndexRegistration>> {
        self.ensure_open()?;

        let registrations = self.inner.backend.put_indexes(definitions).await?;
        for registration in &registrations {
            debug!(index = %registration.name, outcome = ?registration.outcome, "registered index");
        }

        Ok(registrations)
    }

    /// Registers the definition of a statically known index.
    pub async fn execute_index<I: Index>(&self) -> DocumentStoreResult<IndexRegistration> {
        let mut registrations = self.register_indexes(vec![I::definition()?]).await?;

        registrations.pop().ok_or_else(|| {
            DocumentStoreError::Backend(format!("no registration returned for {}", I::NAME))
        })
    }

    /// Stores an attachment under `key`, replacing any previous data and metadata.
    pub async fn put_attachment(
        &self,
        key: &str,
        data: impl Into<Vec<u8>>,
        metadata: AttachmentMetadata,
    ) -> DocumentStoreResult<()> {
        self.ensure_open()?;

        self.inner
            .backend
            .put_attachment(key, data.into(), metadata)
            .await
    }

    /// Reads `reader` to the end and stores the bytes as an attachment.
    pub async fn put_attachment_from_reader<R: Read>(
        &self,
        key: &str,
        mut reader: R,
        metadata: AttachmentMetadata,
    ) -> DocumentStoreResult<()> {
        self.ensure_open()?;

        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;

        self.inner.backend.put_attachment(key, data, metadata).await
    }

    pub async fn get_attachment(&self, key: &str) -> DocumentStoreResult<Option<Attachment>> {
        self.ensure_open()?;

        self.inner.backend.get_attachment(key).await
    }

    pub async fn delete_attachment(&self, key: &str) -> DocumentStoreResult<()> {
        self.ensure_open()?;

        self.inner.backend.delete_attachment(key).await
    }

    /// Applies field operations to a stored document outside any session.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::DocumentNotFound`] if `id` is not stored and
    /// [`DocumentStoreError::InvalidPatch`] if an operation does not fit the document.
    pub async fn patch(
        &self,
        id: &str,
        operations: Vec<PatchOperation>,
    ) -> DocumentStoreResult<Version> {
        self.ensure_open()?;

        let version = self.inner.backend.patch_document(id, operations).await?;
        debug!(id, %version, "patched document");

        Ok(version)
    }

    /// Returns the next client-assigned identity for `collection`.
    pub(crate) async fn next_identity(&self, collection: &str) -> DocumentStoreResult<String> {
        self.ensure_open()?;

        self.inner
            .identities
            .next_id(
                &self.inner.backend,
                collection,
                self.inner.conventions.identity_separator,
            )
            .await
    }
}

impl DynDocumentStore {
    /// Returns the backend as its concrete type, if it is one.
    pub fn backend_as<T: Any>(&self) -> Option<&T> {
        self.inner.backend.as_ref().as_any().downcast_ref::<T>()
    }
}
