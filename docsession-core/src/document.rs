//! Core traits and types for document representation and serialization.
//!
//! This module provides the trait every stored entity implements, the stored form of a
//! document as the remote store returns it, the opaque [`Version`] token, and helpers
//! for reading and writing dotted field paths inside BSON documents.

use bson::{Bson, Document as BsonDocument, de::deserialize_from_bson, ser::serialize_to_bson};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Core trait that all entities stored in a document store must implement.
///
/// Every entity has exactly one string identity, which is `None` until assigned, and
/// belongs to a collection whose name is also the prefix of its identities
/// (`Characters/1` lives in `Characters`).
///
/// # Deriving
///
/// `docsession` re-exports a derive macro of the same name:
///
/// ```ignore
/// use docsession::prelude::*;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize, Document)]
/// #[document(collection = "Characters")]
/// pub struct Character {
///     pub id: Option<String>,
///     pub name: String,
/// }
/// ```
pub trait Document: Serialize + for<'de> Deserialize<'de> + Send + Sync + Clone + 'static {
    /// Returns this entity's identity, if one has been assigned.
    fn id(&self) -> Option<&str>;

    /// Assigns this entity's identity.
    fn set_id(&mut self, id: String);

    /// Returns the name of the collection this entity belongs to.
    fn collection_name() -> &'static str;
}

/// Extension trait providing conversions between entities and BSON documents.
///
/// This trait is automatically implemented for all types that implement [`Document`].
pub trait DocumentExt: Document {
    /// Converts this entity to a BSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the entity does not serialize to a document.
    fn to_document(&self) -> DocumentStoreResult<BsonDocument>;

    /// Creates an entity from a BSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails or the structure is invalid.
    fn from_document(document: BsonDocument) -> DocumentStoreResult<Self>;
}

impl<D: Document> DocumentExt for D {
    fn to_document(&self) -> DocumentStoreResult<BsonDocument> {
        match serialize_to_bson(self)? {
            Bson::Document(document) => Ok(document),
            other => Err(DocumentStoreError::InvalidDocument(format!(
                "{} serialized to {:?} instead of a document",
                D::collection_name(),
                other.element_type()
            ))),
        }
    }

    fn from_document(document: BsonDocument) -> DocumentStoreResult<Self> {
        Ok(deserialize_from_bson(Bson::Document(document))?)
    }
}

/// Opaque concurrency stamp assigned by the remote store on every successful write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    /// Wraps a version token produced by a store.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A document as held by the remote store.
///
/// The `id` is the storage key and is authoritative: whatever identity the body carries
/// is overwritten with it when the document is materialized into an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    /// Storage key, e.g. `Characters/1`.
    pub id: String,
    /// Collection the document belongs to.
    pub collection: String,
    /// Version assigned by the store on the last write.
    pub version: Version,
    /// The document body.
    pub body: BsonDocument,
}

impl StoredDocument {
    /// Deserializes the body into an entity and stamps it with the stored identity.
    pub fn materialize<D: Document>(&self) -> DocumentStoreResult<D> {
        let mut entity = D::from_document(self.body.clone())?;
        entity.set_id(self.id.clone());

        Ok(entity)
    }
}

/// Returns the value at a dotted path (`Class.Name`) inside a document.
///
/// Path segments only descend through nested documents; sequences are not indexed.
pub fn get_path<'a>(document: &'a BsonDocument, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = current.as_document()?.get(segment)?;
    }

    Some(current)
}

/// Returns a mutable reference to the value at a dotted path.
pub fn get_path_mut<'a>(document: &'a mut BsonDocument, path: &str) -> Option<&'a mut Bson> {
    match path.split_once('.') {
        Some((head, rest)) => match document.get_mut(head)? {
            Bson::Document(inner) => get_path_mut(inner, rest),
            _ => None,
        },
        None => document.get_mut(path),
    }
}

/// Sets the value at a dotted path, creating intermediate documents as needed.
///
/// # Errors
///
/// Returns [`DocumentStoreError::InvalidDocument`] if an intermediate segment exists but is
/// not a document.
pub fn set_path(document: &mut BsonDocument, path: &str, value: Bson) -> DocumentStoreResult<()> {
    match path.split_once('.') {
        Some((head, rest)) => {
            if !document.contains_key(head) {
                document.insert(head.to_string(), BsonDocument::new());
            }

            match document.get_mut(head) {
                Some(Bson::Document(inner)) => set_path(inner, rest, value),
                _ => Err(DocumentStoreError::InvalidDocument(format!(
                    "field {head} is not a document"
                ))),
            }
        }
        None => {
            document.insert(path.to_string(), value);
            Ok(())
        }
    }
}

/// Removes the value at a dotted path, returning it if it was present.
pub fn remove_path(document: &mut BsonDocument, path: &str) -> Option<Bson> {
    match path.split_once('.') {
        Some((head, rest)) => match document.get_mut(head)? {
            Bson::Document(inner) => remove_path(inner, rest),
            _ => None,
        },
        None => document.remove(path),
    }
}

/// Collects the identity strings referenced by `path` in a document.
///
/// Strings are returned as-is, sequences contribute each string element, and anything
/// else is ignored. This is how include paths are resolved.
pub fn referenced_ids(document: &BsonDocument, path: &str) -> Vec<String> {
    match get_path(document, path) {
        Some(Bson::String(id)) => vec![id.clone()],
        Some(Bson::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        text: String,
    }

    impl Document for Note {
        fn id(&self) -> Option<&str> {
            self.id.as_deref()
        }

        fn set_id(&mut self, id: String) {
            self.id = Some(id);
        }

        fn collection_name() -> &'static str {
            "Notes"
        }
    }

    #[test]
    fn materialize_takes_identity_from_storage_key() {
        let stored = StoredDocument {
            id: "Notes/7".to_string(),
            collection: "Notes".to_string(),
            version: Version::new("1-x"),
            body: doc! { "id": "Notes/999", "text": "hello" },
        };

        let note: Note = stored.materialize().unwrap();

        assert_eq!(note.id.as_deref(), Some("Notes/7"));
        assert_eq!(note.text, "hello");
    }

    #[test]
    fn dotted_paths_read_and_write_nested_documents() {
        let mut document = doc! { "Class": { "Name": "Developer" } };

        assert_eq!(
            get_path(&document, "Class.Name").and_then(Bson::as_str),
            Some("Developer")
        );

        set_path(&mut document, "Race.Name", Bson::String("Robot".into())).unwrap();
        assert_eq!(
            get_path(&document, "Race.Name").and_then(Bson::as_str),
            Some("Robot")
        );

        assert!(remove_path(&mut document, "Class.Name").is_some());
        assert!(get_path(&document, "Class.Name").is_none());
    }

    #[test]
    fn set_path_refuses_to_descend_into_scalars() {
        let mut document = doc! { "Name": "Mike" };

        let result = set_path(&mut document, "Name.First", Bson::String("M".into()));

        assert!(matches!(result, Err(DocumentStoreError::InvalidDocument(_))));
    }

    #[test]
    fn referenced_ids_reads_strings_and_sequences() {
        let document = doc! {
            "SiblingId": "Characters/2",
            "Friends": ["Characters/3", "Characters/4", 5],
            "Missing": null,
        };

        assert_eq!(referenced_ids(&document, "SiblingId"), vec!["Characters/2"]);
        assert_eq!(
            referenced_ids(&document, "Friends"),
            vec!["Characters/3", "Characters/4"]
        );
        assert!(referenced_ids(&document, "Missing").is_empty());
    }
}
