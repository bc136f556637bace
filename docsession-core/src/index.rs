//! Declarative index definitions.
//!
//! An index is a named map step, optionally followed by a reduce step, that the store
//! materializes and keeps up to date in the background. Queries against an index read
//! its entries instead of raw documents.
//!
//! Both steps are data, not closures, so a definition can be shipped to a remote store,
//! compared for idempotent registration, and re-run against stored documents alone.
//!
//! # Example
//!
//! ```ignore
//! use docsession::index::{IndexDefinition, MapDefinition, ReduceDefinition};
//!
//! // number of characters per class
//! let definition = IndexDefinition::builder("Characters/CharacterCountByClass")
//!     .map(
//!         MapDefinition::from_collection("Characters")
//!             .field("ClassName", "Class.Name")
//!             .constant("Count", 1),
//!     )
//!     .reduce(ReduceDefinition::group_by(["ClassName"]).sum("Count"))
//!     .build()?;
//! ```

use bson::{Bson, Document as BsonDocument};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

use crate::{
    document::get_path,
    error::{DocumentStoreError, DocumentStoreResult},
};

/// Where a map output field takes its value from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldSource {
    /// A dotted path in the source document.
    Document(String),
    /// A dotted path in the current sequence element (only with [`MapDefinition::for_each`]).
    Element(String),
    /// A fixed value.
    Constant(Bson),
}

/// One output field of a map step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapField {
    pub name: String,
    pub source: FieldSource,
}

/// The map step: turns one stored document into zero or more index entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapDefinition {
    /// Collection whose documents are mapped.
    pub collection: String,
    /// When set, one entry is emitted per element of the sequence at this path.
    pub for_each: Option<String>,
    /// Output fields, in order.
    pub fields: Vec<MapField>,
}

impl MapDefinition {
    /// Starts a map over the documents of `collection`.
    pub fn from_collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            for_each: None,
            fields: Vec::new(),
        }
    }

    /// Emits one entry per element of the sequence at `path`.
    pub fn for_each(mut self, path: impl Into<String>) -> Self {
        self.for_each = Some(path.into());
        self
    }

    /// Emits `name` taken from `path` in the source document.
    pub fn field(self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.with_source(name, FieldSource::Document(path.into()))
    }

    /// Emits `name` taken from `path` in the current sequence element.
    pub fn element(self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.with_source(name, FieldSource::Element(path.into()))
    }

    /// Emits `name` with a constant value.
    pub fn constant(self, name: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.with_source(name, FieldSource::Constant(value.into()))
    }

    fn with_source(mut self, name: impl Into<String>, source: FieldSource) -> Self {
        self.fields.push(MapField { name: name.into(), source });
        self
    }

    /// Runs the map step against one document. Missing source values are emitted as null.
    pub fn apply(&self, document: &BsonDocument) -> Vec<BsonDocument> {
        match &self.for_each {
            Some(path) => match get_path(document, path) {
                Some(Bson::Array(elements)) => elements
                    .iter()
                    .map(|element| self.emit(document, Some(element)))
                    .collect(),
                _ => Vec::new(),
            },
            None => vec![self.emit(document, None)],
        }
    }

    fn emit(&self, document: &BsonDocument, element: Option<&Bson>) -> BsonDocument {
        let mut entry = BsonDocument::new();

        for field in &self.fields {
            let value = match &field.source {
                FieldSource::Document(path) => get_path(document, path).cloned(),
                FieldSource::Element(path) => element.and_then(|element| match element {
                    Bson::Document(inner) => get_path(inner, path).cloned(),
                    scalar if path.is_empty() => Some(scalar.clone()),
                    _ => None,
                }),
                FieldSource::Constant(value) => Some(value.clone()),
            };

            entry.insert(field.name.clone(), value.unwrap_or(Bson::Null));
        }

        entry
    }
}

/// Aggregation applied to a non-key field by the reduce step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregation {
    Sum,
    Min,
    Max,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReduceField {
    pub name: String,
    pub aggregation: Aggregation,
}

/// The reduce step: groups entries by key fields and aggregates the rest.
///
/// Its output has the same shape as its input, so the store may reduce in as many passes
/// as it likes (per document, per batch, across batches) and get the same answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReduceDefinition {
    pub group_by: Vec<String>,
    pub aggregations: Vec<ReduceField>,
}

impl ReduceDefinition {
    /// Starts a reduce grouped by `fields`.
    pub fn group_by<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            group_by: fields.into_iter().map(Into::into).collect(),
            aggregations: Vec::new(),
        }
    }

    /// Sums `field` within each group.
    pub fn sum(self, field: impl Into<String>) -> Self {
        self.aggregate(field, Aggregation::Sum)
    }

    /// Keeps the smallest `field` within each group.
    pub fn min(self, field: impl Into<String>) -> Self {
        self.aggregate(field, Aggregation::Min)
    }

    /// Keeps the largest `field` within each group.
    pub fn max(self, field: impl Into<String>) -> Self {
        self.aggregate(field, Aggregation::Max)
    }

    fn aggregate(mut self, field: impl Into<String>, aggregation: Aggregation) -> Self {
        self.aggregations.push(ReduceField { name: field.into(), aggregation });
        self
    }

    /// Runs one reduce pass. Groups come out in order of first appearance.
    pub fn apply<'a>(&self, entries: impl IntoIterator<Item = &'a BsonDocument>) -> Vec<BsonDocument> {
        let mut groups: Vec<(Vec<Bson>, BsonDocument)> = Vec::new();

        for entry in entries {
            let key = self
                .group_by
                .iter()
                .map(|field| entry.get(field).cloned().unwrap_or(Bson::Null))
                .collect::<Vec<_>>();

            match groups.iter_mut().find(|(existing, _)| *existing == key) {
                Some((_, accumulated)) => {
                    for field in &self.aggregations {
                        let current = accumulated.get(&field.name).cloned().unwrap_or(Bson::Null);
                        let incoming = entry.get(&field.name).cloned().unwrap_or(Bson::Null);
                        accumulated.insert(
                            field.name.clone(),
                            combine(field.aggregation, current, incoming),
                        );
                    }
                }
                None => {
                    let mut accumulated = BsonDocument::new();
                    for (field, value) in self.group_by.iter().zip(key.iter()) {
                        accumulated.insert(field.clone(), value.clone());
                    }
                    for field in &self.aggregations {
                        accumulated.insert(
                            field.name.clone(),
                            entry.get(&field.name).cloned().unwrap_or(Bson::Null),
                        );
                    }
                    groups.push((key, accumulated));
                }
            }
        }

        groups.into_iter().map(|(_, accumulated)| accumulated).collect()
    }
}

fn combine(aggregation: Aggregation, current: Bson, incoming: Bson) -> Bson {
    match aggregation {
        Aggregation::Sum => add_numbers(current, incoming),
        Aggregation::Min => match compare_values(&incoming, &current) {
            Some(Ordering::Less) => incoming,
            _ if current == Bson::Null => incoming,
            _ => current,
        },
        Aggregation::Max => match compare_values(&incoming, &current) {
            Some(Ordering::Greater) => incoming,
            _ if current == Bson::Null => incoming,
            _ => current,
        },
    }
}

fn add_numbers(left: Bson, right: Bson) -> Bson {
    match (left, right) {
        (Bson::Int32(a), Bson::Int32(b)) => match a.checked_add(b) {
            Some(sum) => Bson::Int32(sum),
            None => Bson::Int64(a as i64 + b as i64),
        },
        (Bson::Int32(a), Bson::Int64(b)) | (Bson::Int64(b), Bson::Int32(a)) => {
            Bson::Int64((a as i64).saturating_add(b))
        }
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(a.saturating_add(b)),
        (Bson::Double(a), other) | (other, Bson::Double(a)) => match as_f64(&other) {
            Some(b) => Bson::Double(a + b),
            None => Bson::Double(a),
        },
        (Bson::Null, other) | (other, Bson::Null) => other,
        (left, _) => left,
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

fn compare_values(left: &Bson, right: &Bson) -> Option<Ordering> {
    match (left, right) {
        (Bson::String(a), Bson::String(b)) => a.partial_cmp(b),
        (Bson::DateTime(a), Bson::DateTime(b)) => a.partial_cmp(b),
        _ => as_f64(left)?.partial_cmp(&as_f64(right)?),
    }
}

/// Whether the definition was written by a caller or created by the store for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexKind {
    /// Registered explicitly.
    Static,
    /// Created by the store for queries without an index; entries are the documents.
    Auto { fields: Vec<String> },
}

/// A named index definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub kind: IndexKind,
    pub map: MapDefinition,
    pub reduce: Option<ReduceDefinition>,
}

impl IndexDefinition {
    /// Creates a builder for a static index.
    pub fn builder(name: impl Into<String>) -> IndexDefinitionBuilder {
        IndexDefinitionBuilder::new(name)
    }

    /// Describes the automatic index a store keeps for filtering `collection` on `fields`.
    pub fn auto(collection: &str, fields: &[String]) -> Self {
        let suffix = fields
            .iter()
            .map(|field| field.replace("[].", "_").replace('.', "_"))
            .collect::<Vec<_>>()
            .join("And");

        Self {
            name: format!("Auto/{collection}/By{suffix}"),
            kind: IndexKind::Auto { fields: fields.to_vec() },
            map: MapDefinition::from_collection(collection),
            reduce: None,
        }
    }

    /// Returns the collection this index reads.
    pub fn collection(&self) -> &str {
        &self.map.collection
    }

    /// Returns `true` if the index has a reduce step.
    pub fn is_map_reduce(&self) -> bool {
        self.reduce.is_some()
    }

    /// Produces the entries one document contributes, before any cross-document reduce.
    ///
    /// For map/reduce indexes the document's own entries are already reduced once.
    pub fn index_document(&self, document: &BsonDocument) -> Vec<BsonDocument> {
        let mapped = match self.kind {
            IndexKind::Auto { .. } => vec![document.clone()],
            IndexKind::Static => self.map.apply(document),
        };

        match &self.reduce {
            Some(reduce) => reduce.apply(mapped.iter()),
            None => mapped,
        }
    }

    /// Stable identifier of the definition's content, used for idempotent registration.
    pub fn fingerprint(&self) -> DocumentStoreResult<String> {
        let bytes = serde_json::to_vec(self)?;

        Ok(Uuid::new_v5(&Uuid::NAMESPACE_OID, &bytes).to_string())
    }

    /// Checks the definition's structure. Automatic definitions are always valid.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidIndex`] describing the first problem found.
    pub fn validate(&self) -> DocumentStoreResult<()> {
        if matches!(self.kind, IndexKind::Auto { .. }) {
            return Ok(());
        }
        if self.name.trim().is_empty() {
            return Err(DocumentStoreError::InvalidIndex("index name is empty".to_string()));
        }
        if self.map.collection.trim().is_empty() {
            return Err(DocumentStoreError::InvalidIndex(format!(
                "{}: map has no source collection",
                self.name
            )));
        }
        if self.map.fields.is_empty() {
            return Err(DocumentStoreError::InvalidIndex(format!(
                "{}: map emits no fields",
                self.name
            )));
        }

        let mut seen = Vec::new();
        for field in &self.map.fields {
            if seen.contains(&field.name.as_str()) {
                return Err(DocumentStoreError::InvalidIndex(format!(
                    "{}: field {} is emitted twice",
                    self.name, field.name
                )));
            }
            seen.push(field.name.as_str());

            if matches!(field.source, FieldSource::Element(_)) && self.map.for_each.is_none() {
                return Err(DocumentStoreError::InvalidIndex(format!(
                    "{}: field {} reads an element but the map has no for_each",
                    self.name, field.name
                )));
            }
        }

        if let Some(reduce) = &self.reduce {
            if reduce.group_by.is_empty() {
                return Err(DocumentStoreError::InvalidIndex(format!(
                    "{}: reduce has no group key",
                    self.name
                )));
            }

            let reduced = reduce
                .group_by
                .iter()
                .map(String::as_str)
                .chain(reduce.aggregations.iter().map(|field| field.name.as_str()))
                .collect::<Vec<_>>();

            // reduce output must have exactly the map output's fields
            if let Some(missing) = seen.iter().find(|name| !reduced.contains(name)) {
                return Err(DocumentStoreError::InvalidIndex(format!(
                    "{}: map field {missing} is neither grouped nor aggregated",
                    self.name
                )));
            }
            if let Some(extra) = reduced.iter().find(|name| !seen.contains(name)) {
                return Err(DocumentStoreError::InvalidIndex(format!(
                    "{}: reduce field {extra} is not emitted by the map",
                    self.name
                )));
            }
        }

        Ok(())
    }
}

/// Builder for [`IndexDefinition`].
pub struct IndexDefinitionBuilder {
    name: String,
    map: Option<MapDefinition>,
    reduce: Option<ReduceDefinition>,
}

impl IndexDefinitionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), map: None, reduce: None }
    }

    /// Sets the map step.
    pub fn map(mut self, map: MapDefinition) -> Self {
        self.map = Some(map);
        self
    }

    /// Sets the reduce step.
    pub fn reduce(mut self, reduce: ReduceDefinition) -> Self {
        self.reduce = Some(reduce);
        self
    }

    /// Validates and returns the definition.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidIndex`] when the map is missing or empty, or when
    /// the reduce output would not have the same fields as the map output.
    pub fn build(self) -> DocumentStoreResult<IndexDefinition> {
        let map = self.map.ok_or_else(|| {
            DocumentStoreError::InvalidIndex(format!("{}: no map step", self.name))
        })?;

        let definition = IndexDefinition {
            name: self.name,
            kind: IndexKind::Static,
            map,
            reduce: self.reduce,
        };
        definition.validate()?;

        Ok(definition)
    }
}

/// A statically known index, paired with the shape of its entries.
///
/// ```ignore
/// pub struct CharactersByName;
///
/// impl Index for CharactersByName {
///     type Result = Character;
///     const NAME: &'static str = "Characters/ByName";
///
///     fn definition() -> DocumentStoreResult<IndexDefinition> {
///         IndexDefinition::builder(Self::NAME)
///             .map(MapDefinition::from_collection("Characters").field("Name", "Name"))
///             .build()
///     }
/// }
/// ```
pub trait Index: Send + Sync + 'static {
    /// Shape of the tuples an index-entry query returns.
    type Result: for<'de> Deserialize<'de> + Send;

    /// Registered name of the index.
    const NAME: &'static str;

    /// Builds the definition to register.
    fn definition() -> DocumentStoreResult<IndexDefinition>;
}

/// What registering a definition did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexOutcome {
    /// The index did not exist and was created.
    Created,
    /// An identical definition was already registered; nothing changed.
    Unchanged,
    /// The definition changed; the index was reset and will be rebuilt.
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRegistration {
    pub name: String,
    pub outcome: IndexOutcome,
}
