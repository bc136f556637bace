//! A unit-of-work client layer for remote JSON document stores.
//!
//! This crate is the core of the docsession project and provides:
//!
//! - **Document traits** ([`document`]) - The entity trait, stored documents, versions and field paths
//! - **Store backend abstraction** ([`backend`]) - The capability interface a remote store offers
//! - **Document store** ([`store`]) - The shared handle that opens sessions and reaches the store directly
//! - **Sessions** ([`session`]) - Identity map, staged writes, includes and batched commits
//! - **Query and filtering API** ([`query`]) - Query descriptors and filter expressions
//! - **Index definitions** ([`index`]) - Declarative map and map/reduce indexes
//! - **Attachments and patches** ([`attachment`], [`patch`]) - The out-of-band channel
//! - **Identity generation** ([`identity`]) - Client-side HiLo identities
//! - **Conventions** ([`conventions`]) - Store-wide behaviour and session overrides
//! - **Error handling** ([`error`]) - Error types and result types
//! - **Pagination** ([`page`]) - Pages, pagination parameters and query statistics
//!
//! # Example
//!
//! ```ignore
//! use docsession::prelude::*;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, Document)]
//! #[document(collection = "Characters")]
//! pub struct Character {
//!     #[document(id)]
//!     pub id: Option<String>,
//!     pub name: String,
//! }
//!
//! let store = DocumentStore::new(InMemoryStore::new());
//! let mut session = store.open_session()?;
//! session.store(Character { id: None, name: "Mike".into() }).await?;
//! session.save_changes().await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docsession_core;

pub mod attachment;
pub mod backend;
pub mod conventions;
pub mod document;
pub mod error;
pub mod identity;
pub mod index;
pub mod page;
pub mod patch;
pub mod query;
pub mod session;
pub mod store;
