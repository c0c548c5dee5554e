//! In-memory filtering and grouping over a full product listing

use indexmap::IndexMap;
use serde::Serialize;

use super::houses::HouseRegistry;
use crate::store::Product;

/// Products grouped under a key, groups in order of first appearance
pub type Grouped = IndexMap<String, Vec<Product>>;

/// Case-insensitive substring match over name, category, location and tags
pub fn matches_query(product: &Product, query: &str) -> bool {
    let needle = query.to_lowercase();
    product.name.to_lowercase().contains(&needle)
        || product.category.to_lowercase().contains(&needle)
        || product.location.to_lowercase().contains(&needle)
        || product
            .tags
            .iter()
            .any(|tag| tag.to_lowercase().contains(&needle))
}

/// Search products. A blank query yields `None`, meaning no search was run.
///
/// Surrounding whitespace only decides blankness; the query is matched as typed.
pub fn search(products: Vec<Product>, query: &str) -> Option<Vec<Product>> {
    if query.trim().is_empty() {
        return None;
    }
    Some(
        products
            .into_iter()
            .filter(|p| matches_query(p, query))
            .collect(),
    )
}

pub fn in_house(products: Vec<Product>, house_id: &str) -> Vec<Product> {
    products
        .into_iter()
        .filter(|p| p.house_id == house_id)
        .collect()
}

/// Group products by an arbitrary key
pub fn group_by<F>(products: Vec<Product>, mut key: F) -> Grouped
where
    F: FnMut(&Product) -> String,
{
    let mut groups = Grouped::new();
    for product in products {
        groups.entry(key(&product)).or_default().push(product);
    }
    groups
}

pub fn group_by_category(products: Vec<Product>) -> Grouped {
    group_by(products, |p| p.category.clone())
}

pub fn group_by_location(products: Vec<Product>) -> Grouped {
    group_by(products, |p| p.location.clone())
}

/// Group by house display name, unknown house ids grouped under the raw id
pub fn group_by_house(products: Vec<Product>, houses: &HouseRegistry) -> Grouped {
    group_by(products, |p| houses.display_name(&p.house_id).to_string())
}

/// A house with the number of items stored in it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseSummary {
    pub id: u32,
    pub name: String,
    pub item_count: usize,
}

pub fn house_summaries(products: &[Product], houses: &HouseRegistry) -> Vec<HouseSummary> {
    houses
        .houses()
        .iter()
        .map(|house| {
            let key = house.key();
            HouseSummary {
                id: house.id,
                name: house.name.clone(),
                item_count: products.iter().filter(|p| p.house_id == key).count(),
            }
        })
        .collect()
}
