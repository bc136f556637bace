//! Indexes over [`Character`](crate::model::Character)s.

use docsession::{
    error::DocumentStoreResult,
    index::{Index, IndexDefinition, MapDefinition, ReduceDefinition},
};
use serde::{Deserialize, Serialize};

/// Characters by name.
pub struct CharactersByName;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CharacterName {
    pub name: String,
}

impl Index for CharactersByName {
    type Result = CharacterName;
    const NAME: &'static str = "Characters/ByName";

    fn definition() -> DocumentStoreResult<IndexDefinition> {
        IndexDefinition::builder(Self::NAME)
            .map(MapDefinition::from_collection("Characters").field("Name", "Name"))
            .build()
    }
}

/// Number of characters per class.
pub struct CharacterCountByClass;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReduceResult {
    pub class_name: String,
    pub count: u32,
}

impl Index for CharacterCountByClass {
    type Result = ReduceResult;
    const NAME: &'static str = "Characters/CharacterCountByClass";

    fn definition() -> DocumentStoreResult<IndexDefinition> {
        IndexDefinition::builder(Self::NAME)
            .map(
                MapDefinition::from_collection("Characters")
                    .field("ClassName", "Class.Name")
                    .constant("Count", 1),
            )
            .reduce(ReduceDefinition::group_by(["ClassName"]).sum("Count"))
            .build()
    }
}

/// Every index of the game, for registration at startup.
pub fn all() -> DocumentStoreResult<Vec<IndexDefinition>> {
    Ok(vec![
        CharactersByName::definition()?,
        CharacterCountByClass::definition()?,
    ])
}
