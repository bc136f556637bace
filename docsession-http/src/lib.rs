//! HTTP backend for docsession.
//!
//! [`HttpStore`] implements `StoreBackend` over a small JSON API, one request per backend
//! call. The [`wire`] module holds the request and response bodies, so a server for the
//! same API can be written against the same types.
//!
//! # Quick Start
//!
//! ```ignore
//! use docsession::prelude::*;
//! use docsession_http::HttpStore;
//!
//! let backend = HttpStore::builder("http://localhost:8080/").build().await?;
//! let store = DocumentStore::new(backend);
//! ```

#[allow(unused_extern_crates)]
extern crate self as docsession_http;

pub mod store;
pub mod wire;

pub use store::{HttpStore, HttpStoreBuilder};
