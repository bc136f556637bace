//! Field-level patch operations applied by the store to a single document.
//!
//! A patch is an ordered list of [`PatchOperation`]s. The whole list is applied or none
//! of it is: [`apply_patch`] works on a copy and only hands it back when every
//! operation succeeded.
//!
//! ```ignore
//! use docsession::patch::PatchOperation;
//!
//! store
//!     .patch(
//!         "Characters/1",
//!         vec![PatchOperation::add(
//!             "Inventory",
//!             doc! { "Name": "Old Boot", "Attack": 1, "Defence": 0 },
//!         )],
//!     )
//!     .await?;
//! ```

use bson::{Bson, Document as BsonDocument};
use serde::{Deserialize, Serialize};

use crate::{
    document::{get_path_mut, remove_path, set_path},
    error::{DocumentStoreError, DocumentStoreResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchKind {
    /// Append `value` to the sequence at `field`, creating the sequence if missing.
    Add,
    /// Set `field` to `value`.
    Set,
    /// Add the number `value` to the number at `field`; a missing field is set.
    Inc,
    /// Remove the first element equal to `value` from the sequence at `field`.
    Remove,
    /// Remove `field`.
    Unset,
}

/// One field operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub kind: PatchKind,
    /// Dotted path to the target field.
    pub field: String,
    #[serde(default)]
    pub value: Bson,
}

impl PatchOperation {
    pub fn new(kind: PatchKind, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self { kind, field: field.into(), value: value.into() }
    }

    pub fn add(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::new(PatchKind::Add, field, value)
    }

    pub fn set(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::new(PatchKind::Set, field, value)
    }

    pub fn inc(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::new(PatchKind::Inc, field, value)
    }

    pub fn remove(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::new(PatchKind::Remove, field, value)
    }

    pub fn unset(field: impl Into<String>) -> Self {
        Self::new(PatchKind::Unset, field, Bson::Null)
    }

    fn apply(&self, document: &mut BsonDocument) -> DocumentStoreResult<()> {
        match self.kind {
            PatchKind::Set => set_path(document, &self.field, self.value.clone())
                .map_err(|err| DocumentStoreError::InvalidPatch(err.to_string())),
            PatchKind::Unset => {
                remove_path(document, &self.field);
                Ok(())
            }
            PatchKind::Add => match get_path_mut(document, &self.field) {
                Some(Bson::Array(items)) => {
                    items.push(self.value.clone());
                    Ok(())
                }
                Some(other) => Err(self.mismatch("a sequence", other)),
                None => set_path(document, &self.field, Bson::Array(vec![self.value.clone()]))
                    .map_err(|err| DocumentStoreError::InvalidPatch(err.to_string())),
            },
            PatchKind::Remove => match get_path_mut(document, &self.field) {
                Some(Bson::Array(items)) => {
                    if let Some(position) = items.iter().position(|item| *item == self.value) {
                        items.remove(position);
                    }
                    Ok(())
                }
                Some(other) => Err(self.mismatch("a sequence", other)),
                None => Ok(()),
            },
            PatchKind::Inc => {
                match get_path_mut(document, &self.field) {
                    Some(existing) if !is_number(existing) || !is_number(&self.value) => {
                        Err(self.mismatch("a number", existing))
                    }
                    Some(existing) => match increment(existing, &self.value) {
                        Some(sum) => {
                            *existing = sum;
                            Ok(())
                        }
                        None => Err(DocumentStoreError::InvalidPatch(format!(
                            "incrementing {} overflows",
                            self.field
                        ))),
                    },
                    None if is_number(&self.value) => {
                        set_path(document, &self.field, self.value.clone())
                            .map_err(|err| DocumentStoreError::InvalidPatch(err.to_string()))
                    }
                    None => Err(DocumentStoreError::InvalidPatch(format!(
                        "cannot increment {} by a non-number",
                        self.field
                    ))),
                }
            }
        }
    }

    fn mismatch(&self, expected: &str, found: &Bson) -> DocumentStoreError {
        DocumentStoreError::InvalidPatch(format!(
            "{:?} on {} needs {expected}, found {:?}",
            self.kind,
            self.field,
            found.element_type()
        ))
    }
}

fn is_number(value: &Bson) -> bool {
    matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))
}

/// Adds two numbers, widening `Int32` to `Int64` when needed. `None` on overflow or when
/// either side is not a number.
fn increment(current: &Bson, by: &Bson) -> Option<Bson> {
    Some(match (current, by) {
        (Bson::Int32(a), Bson::Int32(b)) => match a.checked_add(*b) {
            Some(sum) => Bson::Int32(sum),
            None => Bson::Int64(*a as i64 + *b as i64),
        },
        (Bson::Int32(a), Bson::Int64(b)) => Bson::Int64((*a as i64).checked_add(*b)?),
        (Bson::Int64(a), Bson::Int32(b)) => Bson::Int64(a.checked_add(*b as i64)?),
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(a.checked_add(*b)?),
        (Bson::Double(a), Bson::Double(b)) => Bson::Double(a + b),
        (Bson::Double(a), Bson::Int32(b)) => Bson::Double(a + *b as f64),
        (Bson::Double(a), Bson::Int64(b)) => Bson::Double(a + *b as f64),
        (Bson::Int32(a), Bson::Double(b)) => Bson::Double(*a as f64 + b),
        (Bson::Int64(a), Bson::Double(b)) => Bson::Double(*a as f64 + b),
        _ => return None,
    })
}

/// Applies every operation in order and returns the patched document.
///
/// # Errors
///
/// Returns [`DocumentStoreError::InvalidPatch`] on the first operation whose target has the
/// wrong type. The input document is left untouched.
pub fn apply_patch(
    document: &BsonDocument,
    operations: &[PatchOperation],
) -> DocumentStoreResult<BsonDocument> {
    let mut patched = document.clone();

    for operation in operations {
        operation.apply(&mut patched)?;
    }

    Ok(patched)
}
