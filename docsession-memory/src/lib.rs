//! In-memory document store backend for docsession.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It behaves like a remote store from a session's point of view and is the backend of
//! choice for tests and local development.
//!
//! # Features
//!
//! - **Versioned writes** - Every write gets a fresh version; batches are all-or-nothing
//! - **Eventually consistent indexes** - Queries report staleness until indexing catches up
//! - **Map/reduce** - Reduce output is computed across every indexed document
//! - **Attachments, patches and identity ranges** - The rest of the store surface
//!
//! # Quick Start
//!
//! ```ignore
//! use docsession::prelude::*;
//! use docsession_memory::InMemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let store = DocumentStore::new(InMemoryStore::new());
//!
//!     let mut session = store.open_session()?;
//!     session.store(Character { id: None, name: "Alice".to_string() }).await?;
//!     session.save_changes().await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docsession_memory;

mod evaluator;
pub mod store;

pub use store::{InMemoryStore, InMemoryStoreBuilder, IndexingMode};
