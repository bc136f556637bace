//! Client-side identity generation.
//!
//! Identities are `"<Collection><separator><n>"`. Numbers come from blocks the store
//! reserves for this client ([`IdentityRange`]), so an entity gets its final identity the
//! moment it is stored in a session and other entities can reference it before commit.

use mea::rwlock::RwLock;
use std::collections::HashMap;
use tracing::debug;

use crate::{
    backend::{IdentityRange, StoreBackend},
    error::DocumentStoreResult,
};

/// Builds an identity from a collection name and a number.
pub fn format_identity(collection: &str, separator: char, number: u64) -> String {
    format!("{collection}{separator}{number}")
}

/// Returns `true` for identities the store is asked to complete (`Characters/`).
pub fn is_provisional(id: &str, separator: char) -> bool {
    id.ends_with(separator)
}

#[derive(Debug)]
struct Cursor {
    next: u64,
    high: u64,
}

/// Per-collection HiLo generator shared by every session of one store handle.
#[derive(Debug, Default)]
pub struct HiLoIdentityGenerator {
    cursors: RwLock<HashMap<String, Cursor>>,
}

impl HiLoIdentityGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next free number for `collection`, reserving a new block from the
    /// backend when the current one is used up.
    pub async fn next_number<B: StoreBackend>(
        &self,
        backend: &B,
        collection: &str,
    ) -> DocumentStoreResult<u64> {
        let mut cursors = self.cursors.write().await;

        if let Some(cursor) = cursors.get_mut(collection) {
            if cursor.next <= cursor.high {
                let number = cursor.next;
                cursor.next += 1;
                return Ok(number);
            }
        }

        let IdentityRange { low, high } = backend.next_identity_range(collection).await?;
        debug!(collection, low, high, "reserved identity range");

        cursors.insert(collection.to_string(), Cursor { next: low + 1, high });

        Ok(low)
    }

    /// Returns the next identity for `collection`.
    pub async fn next_id<B: StoreBackend>(
        &self,
        backend: &B,
        collection: &str,
        separator: char,
    ) -> DocumentStoreResult<String> {
        let number = self.next_number(backend, collection).await?;

        Ok(format_identity(collection, separator, number))
    }
}
