//! A unit-of-work client for remote JSON document stores.
//!
//! This crate is the primary entry point for users of docsession. It re-exports the core
//! types from the sub-crates, the `Document` derive, and the storage backends.
//!
//! # Features
//!
//! - **Sessions** - An identity map, staged writes and one atomic batch per `save_changes`
//! - **Optimistic concurrency** - Every commit checks the versions the session saw
//! - **Indexes** - Declarative map and map/reduce indexes, queried through the session
//! - **Attachments and patches** - A direct channel to the store outside any session
//!
//! # Quick Start
//!
//! ```ignore
//! use docsession::{prelude::*, memory::InMemoryStore};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, Document)]
//! #[serde(rename_all = "PascalCase")]
//! pub struct Character {
//!     pub id: Option<String>,
//!     pub name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let store = DocumentStore::new(InMemoryStore::new());
//!
//!     let mut session = store.open_session()?;
//!     let mike = session
//!         .store(Character { id: None, name: "Mike Keenan".to_string() })
//!         .await?;
//!     session.save_changes().await?;
//!
//!     let id = mike.read().id.clone();
//!     println!("stored {id:?}");
//!
//!     store.dispose().await
//! }
//! ```
//!
//! # Choosing a backend at runtime
//!
//! [`connect`] picks a backend from a URL and returns a [`DynDocumentStore`]:
//!
//! ```ignore
//! let store = docsession::connect("memory://rpg").await?;
//! let store = docsession::connect("http://localhost:8080/").await?; // `http` feature
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing
//! - `http` - A remote store over HTTP (requires the `http` feature)

pub mod prelude;

pub use docsession_core::{
    attachment, backend, conventions, document, error, identity, index, page, patch, query,
    session, store,
};
pub use docsession_macros::Document;

// Re-export BSON types for convenience
pub use bson;

use docsession_core::{
    backend::DynStoreBackend,
    error::{DocumentStoreError, DocumentStoreResult},
    store::DynDocumentStore,
};
use tracing::debug;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docsession_memory::{InMemoryStore, InMemoryStoreBuilder, IndexingMode};
}

/// HTTP storage backend implementations.
///
/// This module is only available when the `http` feature is enabled.
#[cfg(feature = "http")]
pub mod http {
    pub use docsession_http::{HttpStore, HttpStoreBuilder, wire};
}

/// Opens a store for `url` with a backend chosen by its scheme.
///
/// - `memory://<name>` - a fresh in-memory store
/// - `http://…`, `https://…` - a remote store (requires the `http` feature)
///
/// # Errors
///
/// Returns [`DocumentStoreError::Configuration`] for malformed URLs and unknown schemes.
pub async fn connect(url: &str) -> DocumentStoreResult<DynDocumentStore> {
    let Some((scheme, _)) = url.split_once("://") else {
        return Err(DocumentStoreError::Configuration(format!(
            "invalid url {url}: missing scheme"
        )));
    };

    let backend: Box<dyn DynStoreBackend> = match scheme {
        "memory" => Box::new(memory::InMemoryStore::new()),
        #[cfg(feature = "http")]
        "http" | "https" => {
            use docsession_core::backend::StoreBackendBuilder;

            Box::new(http::HttpStore::builder(url).build().await?)
        }
        other => {
            return Err(DocumentStoreError::Configuration(format!(
                "unsupported scheme {other} in {url}"
            )));
        }
    };

    debug!(url, "connected document store");

    Ok(DynDocumentStore::new(backend))
}
