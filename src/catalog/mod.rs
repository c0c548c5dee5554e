//! Catalog views: house registry, search, grouping and form input handling

pub mod forms;
pub mod houses;
pub mod views;

pub use forms::{EditItemForm, FormError, NewItemForm};
pub use houses::{House, HouseRegistry};
