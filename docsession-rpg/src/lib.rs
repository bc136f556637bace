//! A role-playing game model used to exercise docsession end to end.
//!
//! [`model`] holds the stored entities and [`indexes`] the index definitions queried
//! against them. The integration tests under `tests/` walk through the store's behaviour
//! with these types.

pub mod indexes;
pub mod model;

pub use indexes::{CharacterCountByClass, CharactersByName, ReduceResult};
pub use model::{Character, CharacterClass, Item, Race};
