//! Form-side input checks applied before anything reaches the product store

use serde::{Deserialize, Serialize};

use super::houses::HouseRegistry;
use crate::store::{NewProduct, ProductPatch};

pub const CATEGORY_SUGGESTIONS: &[&str] = &[
    "Furniture",
    "Electronics",
    "Kitchenware",
    "Clothing",
    "Books",
    "Toys",
    "Tools",
    "Other",
];

pub const LOCATION_SUGGESTIONS: &[&str] = &[
    "Living room",
    "Kitchen",
    "Bedroom",
    "Study",
    "Bathroom",
    "Storage",
    "Balcony",
    "Other",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormError {
    #[error("{0} is required")]
    Required(&'static str),

    #[error("Unknown house: {0}")]
    UnknownHouse(String),
}

/// Trim tags, drop blanks and duplicates, keep first-seen order
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

fn required(value: &str, field: &'static str) -> Result<String, FormError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(FormError::Required(field));
    }
    Ok(value.to_string())
}

fn check_house(house_id: &str, houses: &HouseRegistry) -> Result<String, FormError> {
    let house_id = house_id.trim();
    if !house_id.is_empty() && !houses.contains(house_id) {
        return Err(FormError::UnknownHouse(house_id.to_string()));
    }
    Ok(house_id.to_string())
}

/// Submitted "new item" form
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewItemForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub house_id: String,
    #[serde(default)]
    pub description: String,
}

impl NewItemForm {
    /// Validate and normalize into store input. An empty house id is allowed.
    pub fn into_new_product(self, houses: &HouseRegistry) -> Result<NewProduct, FormError> {
        Ok(NewProduct {
            name: required(&self.name, "name")?,
            category: required(&self.category, "category")?,
            location: required(&self.location, "location")?,
            tags: normalize_tags(&self.tags),
            house_id: check_house(&self.house_id, houses)?,
            description: self.description,
        })
    }
}

/// Submitted "edit item" form, every field optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditItemForm {
    pub name: Option<String>,
    pub category: Option<String>,
    pub location: Option<String>,
    pub tags: Option<Vec<String>>,
    pub house_id: Option<String>,
    pub description: Option<String>,
}

impl EditItemForm {
    /// Validate the fields that are present and build a patch from them
    pub fn into_patch(self, houses: &HouseRegistry) -> Result<ProductPatch, FormError> {
        Ok(ProductPatch {
            name: self.name.map(|v| required(&v, "name")).transpose()?,
            category: self.category.map(|v| required(&v, "category")).transpose()?,
            location: self.location.map(|v| required(&v, "location")).transpose()?,
            tags: self.tags.map(normalize_tags),
            house_id: self.house_id.map(|v| check_house(&v, houses)).transpose()?,
            description: self.description,
        })
    }
}

/// Suggestion lists offered by the item forms
#[derive(Debug, Clone, Serialize)]
pub struct Suggestions {
    pub categories: &'static [&'static str],
    pub locations: &'static [&'static str],
}

pub fn suggestions() -> Suggestions {
    Suggestions {
        categories: CATEGORY_SUGGESTIONS,
        locations: LOCATION_SUGGESTIONS,
    }
}
