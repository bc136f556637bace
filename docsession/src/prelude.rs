//! Convenient re-exports of commonly used types from docsession.
//!
//! ```ignore
//! use docsession::prelude::*;
//! ```
//!
//! This provides access to:
//! - The `Document` trait and derive
//! - The store, sessions and tracked entities
//! - Query construction, pagination and index definitions
//! - Attachments, patches and error types

pub use docsession_core::{
    attachment::{Attachment, AttachmentMetadata},
    backend::{DynStoreBackend, StoreBackend, StoreBackendBuilder},
    conventions::{Conventions, SessionOptions},
    document::{Document, DocumentExt, Version},
    error::{DocumentStoreError, DocumentStoreResult},
    index::{
        Index, IndexDefinition, IndexOutcome, IndexRegistration, MapDefinition, ReduceDefinition,
    },
    page::{Page, PaginationParams, QueryResults, QueryStatistics},
    patch::PatchOperation,
    query::{Expr, Filter, Query, SortDirection},
    session::{Session, SessionState, Tracked},
    store::{DocumentStore, DynDocumentStore},
};
pub use docsession_macros::Document;
