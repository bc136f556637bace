//! The characters of a small role-playing game.

use docsession::{
    Document,
    bson::{Bson, ser::serialize_to_bson},
    error::DocumentStoreResult,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Document)]
#[serde(rename_all = "PascalCase")]
pub struct Character {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub class: CharacterClass,
    pub race: Race,
    #[serde(default)]
    pub inventory: Vec<Item>,
    /// Key of the character's portrait attachment.
    #[serde(default)]
    pub image_id: Option<String>,
    /// Identity of another character.
    #[serde(default)]
    pub sibling_id: Option<String>,
}

impl Character {
    pub fn new(name: impl Into<String>, class: impl Into<String>, race: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            class: CharacterClass { name: class.into() },
            race: Race { name: race.into() },
            inventory: Vec::new(),
            image_id: None,
            sibling_id: None,
        }
    }

    pub fn with_item(mut self, item: Item) -> Self {
        self.inventory.push(item);
        self
    }

    pub fn with_image(mut self, key: impl Into<String>) -> Self {
        self.image_id = Some(key.into());
        self
    }

    pub fn with_sibling(mut self, id: impl Into<String>) -> Self {
        self.sibling_id = Some(id.into());
        self
    }

    /// Returns the strongest attack among the carried items.
    pub fn best_attack(&self) -> Option<u32> {
        self.inventory.iter().map(|item| item.attack).max()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CharacterClass {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Race {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Item {
    pub name: String,
    pub attack: u32,
    pub defence: u32,
}

impl Item {
    pub fn new(name: impl Into<String>, attack: u32, defence: u32) -> Self {
        Self { name: name.into(), attack, defence }
    }

    /// Converts the item to the value a patch operation carries.
    pub fn to_bson(&self) -> DocumentStoreResult<Bson> {
        Ok(serialize_to_bson(self)?)
    }
}
