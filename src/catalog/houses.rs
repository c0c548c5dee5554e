//! Static house registry

use serde::{Deserialize, Serialize};

/// A house items can belong to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct House {
    pub id: u32,
    pub name: String,
}

impl House {
    /// Products reference houses by the string form of the id
    pub fn key(&self) -> String {
        self.id.to_string()
    }
}

/// Registry of known houses, in display order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HouseRegistry {
    houses: Vec<House>,
}

impl HouseRegistry {
    pub fn new(houses: Vec<House>) -> Self {
        Self { houses }
    }

    /// Parse a JSON array of `{ "id": number, "name": string }`
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw).map(Self::new)
    }

    pub fn houses(&self) -> &[House] {
        &self.houses
    }

    /// Find a house by the id string products carry
    pub fn get(&self, house_id: &str) -> Option<&House> {
        self.houses.iter().find(|h| h.key() == house_id)
    }

    pub fn contains(&self, house_id: &str) -> bool {
        self.get(house_id).is_some()
    }

    /// Display name for a product's house id, falling back to the raw id
    pub fn display_name<'a>(&'a self, house_id: &'a str) -> &'a str {
        self.get(house_id).map(|h| h.name.as_str()).unwrap_or(house_id)
    }
}

impl Default for HouseRegistry {
    fn default() -> Self {
        Self::new(
            [(1, "Anchor"), (2, "Calvary"), (3, "Pharos"), (4, "Fisherman")]
                .into_iter()
                .map(|(id, name)| House {
                    id,
                    name: name.to_string(),
                })
                .collect(),
        )
    }
}
