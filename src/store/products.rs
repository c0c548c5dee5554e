//! Product repository - sole owner of item persistence and id allocation

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::{Document, DocumentStore, StoreError};

/// Collection holding product documents
pub const PRODUCTS_COLLECTION: &str = "products";

/// Counter document backing product id allocation
pub const PRODUCT_COUNTER: &str = "products";

const ID_PREFIX: char = 'P';
const ID_DIGITS: usize = 6;

/// Logical product id, `P` followed by an at least 6-digit zero-padded sequence
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProductId(String);

impl ProductId {
    pub fn from_sequence(seq: u64) -> Self {
        Self(format!("{}{:0width$}", ID_PREFIX, seq, width = ID_DIGITS))
    }

    /// Numeric suffix of the id
    pub fn sequence(&self) -> u64 {
        // Validated on construction
        self.0[1..].parse().unwrap_or(0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid product id '{0}', expected P followed by at least 6 digits")]
pub struct InvalidProductId(pub String);

impl FromStr for ProductId {
    type Err = InvalidProductId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix(ID_PREFIX)
            .ok_or_else(|| InvalidProductId(s.to_string()))?;
        if digits.len() < ID_DIGITS
            || !digits.bytes().all(|b| b.is_ascii_digit())
            || digits.parse::<u64>().is_err()
        {
            return Err(InvalidProductId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for ProductId {
    type Error = InvalidProductId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProductId> for String {
    fn from(id: ProductId) -> Self {
        id.0
    }
}

/// A catalogued household item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,
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

/// Every product field except the id, which only the store assigns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    pub name: String,
    pub category: String,
    pub location: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub house_id: String,
    #[serde(default)]
    pub description: String,
}

impl NewProduct {
    fn with_id(self, id: ProductId) -> Product {
        Product {
            id,
            name: self.name,
            category: self.category,
            location: self.location,
            tags: self.tags,
            house_id: self.house_id,
            description: self.description,
        }
    }
}

/// Partial product update. The id has no field here, so it can never change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub house_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ProductPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn to_document<T: Serialize>(value: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(StoreError::MalformedDocument(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

fn from_document(data: Document) -> Result<Product, StoreError> {
    Ok(serde_json::from_value(serde_json::Value::Object(data))?)
}

/// Product store operations
#[derive(Clone)]
pub struct ProductStore {
    backend: Arc<dyn DocumentStore>,
}

impl ProductStore {
    pub fn new(backend: Arc<dyn DocumentStore>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    /// Allocate the next product id.
    ///
    /// The only path that touches the counter. Allocated ids are never returned
    /// to the pool, even if the caller fails afterwards.
    pub async fn allocate_id(&self) -> Result<ProductId, StoreError> {
        let seq = self
            .backend
            .increment_counter(PRODUCT_COUNTER)
            .await
            .map_err(|e| {
                error!(error = %e, "Product id allocation failed");
                e
            })?;
        Ok(ProductId::from_sequence(seq))
    }

    /// Create a product and return its assigned id
    pub async fn create(&self, fields: NewProduct) -> Result<ProductId, StoreError> {
        let id = self.allocate_id().await?;
        let product = fields.with_id(id.clone());
        let doc = to_document(&product)?;

        if let Err(e) = self.backend.add(PRODUCTS_COLLECTION, doc).await {
            // The counter has already moved; this id is burned
            error!(product_id = %id, error = %e, "Product insert failed after id allocation");
            return Err(e);
        }

        info!(product_id = %id, name = %product.name, "Product created");
        Ok(id)
    }

    /// Every product, in no particular order.
    ///
    /// Documents that cannot be read as a product are logged and left out.
    pub async fn list(&self) -> Result<Vec<Product>, StoreError> {
        let docs = self.backend.get_all(PRODUCTS_COLLECTION).await?;
        let products = docs
            .into_iter()
            .filter_map(|d| match from_document(d.data) {
                Ok(product) => Some(product),
                Err(e) => {
                    warn!(document_id = %d.id, error = %e, "Skipping unreadable product document");
                    None
                }
            })
            .collect();
        Ok(products)
    }

    /// Look up a product by its logical id
    pub async fn get_by_id(&self, id: &ProductId) -> Result<Option<Product>, StoreError> {
        let found = self
            .backend
            .find_by_key(PRODUCTS_COLLECTION, id.as_str())
            .await?;
        found.map(|d| from_document(d.data)).transpose()
    }

    /// Merge the fields set in `patch` into a product.
    ///
    /// Returns false when no product has this id.
    pub async fn update(&self, id: &ProductId, patch: ProductPatch) -> Result<bool, StoreError> {
        let Some(found) = self
            .backend
            .find_by_key(PRODUCTS_COLLECTION, id.as_str())
            .await?
        else {
            debug!(product_id = %id, "Update skipped, no such product");
            return Ok(false);
        };

        if patch.is_empty() {
            return Ok(true);
        }

        let matched = self
            .backend
            .update(PRODUCTS_COLLECTION, &found.id, to_document(&patch)?)
            .await?;
        if matched {
            info!(product_id = %id, "Product updated");
        }
        Ok(matched)
    }

    /// Remove a product. Deleting a missing id is not an error.
    pub async fn delete(&self, id: &ProductId) -> Result<bool, StoreError> {
        let Some(found) = self
            .backend
            .find_by_key(PRODUCTS_COLLECTION, id.as_str())
            .await?
        else {
            debug!(product_id = %id, "Delete skipped, no such product");
            return Ok(false);
        };

        let removed = self.backend.delete(PRODUCTS_COLLECTION, &found.id).await?;
        if removed {
            info!(product_id = %id, "Product deleted");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use futures::future::join_all;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::store::{DocumentId, MemoryStore, StoredDocument};

    fn sofa() -> NewProduct {
        NewProduct {
            name: "Sofa".to_string(),
            category: "Furniture".to_string(),
            location: "Living room".to_string(),
            tags: vec!["Living".to_string(), "Brown".to_string()],
            house_id: "1".to_string(),
            description: "Leather, three seats".to_string(),
        }
    }

    fn memory_store() -> (MemoryStore, ProductStore) {
        let memory = MemoryStore::new();
        let store = ProductStore::new(Arc::new(memory.clone()));
        (memory, store)
    }

    /// Wraps a memory store and fails a configurable number of calls
    struct FlakyStore {
        inner: MemoryStore,
        failing_adds: AtomicU32,
        failing_counters: AtomicU32,
    }

    impl FlakyStore {
        fn new(failing_counters: u32, failing_adds: u32) -> Self {
            Self {
                inner: MemoryStore::new(),
                failing_adds: AtomicU32::new(failing_adds),
                failing_counters: AtomicU32::new(failing_counters),
            }
        }

        fn take(counter: &AtomicU32) -> bool {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    #[async_trait]
    impl DocumentStore for FlakyStore {
        fn backend_name(&self) -> &'static str {
            "flaky"
        }

        async fn increment_counter(&self, counter: &str) -> Result<u64, StoreError> {
            if Self::take(&self.failing_counters) {
                return Err(StoreError::Contention {
                    counter: counter.to_string(),
                    attempts: 3,
                });
            }
            self.inner.increment_counter(counter).await
        }

        async fn add(&self, collection: &str, data: Document) -> Result<DocumentId, StoreError> {
            if Self::take(&self.failing_adds) {
                return Err(StoreError::MalformedDocument("insert rejected".to_string()));
            }
            self.inner.add(collection, data).await
        }

        async fn get_all(&self, collection: &str) -> Result<Vec<StoredDocument>, StoreError> {
            self.inner.get_all(collection).await
        }

        async fn find_by_key(
            &self,
            collection: &str,
            key: &str,
        ) -> Result<Option<StoredDocument>, StoreError> {
            self.inner.find_by_key(collection, key).await
        }

        async fn update(
            &self,
            collection: &str,
            id: &DocumentId,
            patch: Document,
        ) -> Result<bool, StoreError> {
            self.inner.update(collection, id, patch).await
        }

        async fn delete(&self, collection: &str, id: &DocumentId) -> Result<bool, StoreError> {
            self.inner.delete(collection, id).await
        }
    }

    #[test]
    fn test_product_id_format() {
        assert_eq!(ProductId::from_sequence(42).as_str(), "P000042");
        assert_eq!(ProductId::from_sequence(1_000_000).as_str(), "P1000000");
        assert_eq!(ProductId::from_sequence(42).sequence(), 42);
    }

    #[test]
    fn test_product_id_parse() {
        assert_ok!("P000001".parse::<ProductId>());
        assert_ok!("P1234567".parse::<ProductId>());
        assert_err!("000001".parse::<ProductId>());
        assert_err!("P12345".parse::<ProductId>());
        assert_err!("P00000a".parse::<ProductId>());
        assert_err!("p000001".parse::<ProductId>());
    }

    #[test]
    fn test_product_serializes_camel_case() {
        let product = sofa().with_id(ProductId::from_sequence(1));
        let json = serde_json::to_value(&product).unwrap();
        assert_eq!(json["id"], "P000001");
        assert_eq!(json["houseId"], "1");
        assert!(json.get("house_id").is_none());
    }

    #[test]
    fn test_patch_skips_unset_fields() {
        let patch = ProductPatch {
            name: Some("X".to_string()),
            ..Default::default()
        };
        let doc = to_document(&patch).unwrap();
        assert_eq!(doc.len(), 1);
        assert_eq!(doc["name"], "X");
        assert!(!patch.is_empty());
        assert!(ProductPatch::default().is_empty());
    }

    #[tokio::test]
    async fn test_create_then_get_round_trips() {
        let (_, store) = memory_store();
        let id = store.create(sofa()).await.unwrap();

        let product = store.get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(product, sofa().with_id(id));
    }

    #[tokio::test]
    async fn test_create_accepts_unvalidated_fields() {
        let (_, store) = memory_store();
        let id = store
            .create(NewProduct {
                house_id: "no-such-house".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let product = store.get_by_id(&id).await.unwrap().unwrap();
        assert!(product.name.is_empty());
        assert_eq!(product.house_id, "no-such-house");
    }

    #[tokio::test]
    async fn test_ids_are_strictly_increasing() {
        let (_, store) = memory_store();
        let mut previous = 0;
        for _ in 0..5 {
            let id = store.create(sofa()).await.unwrap();
            assert!(id.sequence() > previous);
            previous = id.sequence();
        }
        assert_eq!(previous, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_get_unique_ids() {
        let (memory, store) = memory_store();

        let tasks = (0..64).map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                let mut fields = sofa();
                fields.name = format!("Item {}", i);
                store.create(fields).await
            })
        });

        let ids: Vec<ProductId> = join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        let unique: HashSet<&ProductId> = ids.iter().collect();
        assert_eq!(unique.len(), 64);
        for id in &ids {
            assert_eq!(id.as_str().len(), 7);
            assert!(id.as_str().parse::<ProductId>().is_ok());
        }
        assert_eq!(memory.counter_value(PRODUCT_COUNTER), 64);
        assert_eq!(store.list().await.unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_update_changes_only_patched_fields() {
        let (_, store) = memory_store();
        let id = store.create(sofa()).await.unwrap();

        let matched = store
            .update(
                &id,
                ProductPatch {
                    name: Some("X".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(matched);

        let product = store.get_by_id(&id).await.unwrap().unwrap();
        let mut expected = sofa().with_id(id);
        expected.name = "X".to_string();
        assert_eq!(product, expected);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_an_error() {
        let (memory, store) = memory_store();
        store.create(sofa()).await.unwrap();

        let matched = store
            .update(
                &ProductId::from_sequence(999),
                ProductPatch {
                    name: Some("X".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!matched);
        assert_eq!(memory.document_count(PRODUCTS_COLLECTION), 1);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (memory, store) = memory_store();
        let id = store.create(sofa()).await.unwrap();

        assert!(store.delete(&id).await.unwrap());
        assert!(store.get_by_id(&id).await.unwrap().is_none());
        assert!(!store.delete(&id).await.unwrap());
        assert!(store.get_by_id(&id).await.unwrap().is_none());

        // Deletion never recycles ids
        assert_eq!(memory.counter_value(PRODUCT_COUNTER), 1);
        let next = store.create(sofa()).await.unwrap();
        assert_eq!(next.sequence(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_updates_on_different_items() {
        let (_, store) = memory_store();
        let first = store.create(sofa()).await.unwrap();
        let second = store.create(sofa()).await.unwrap();

        let rename = |id: ProductId, name: &str| {
            let store = store.clone();
            let patch = ProductPatch {
                name: Some(name.to_string()),
                ..Default::default()
            };
            tokio::spawn(async move { store.update(&id, patch).await })
        };

        let (a, b) = tokio::join!(rename(first.clone(), "Left"), rename(second.clone(), "Right"));
        assert!(a.unwrap().unwrap());
        assert!(b.unwrap().unwrap());

        assert_eq!(store.get_by_id(&first).await.unwrap().unwrap().name, "Left");
        assert_eq!(store.get_by_id(&second).await.unwrap().unwrap().name, "Right");
    }

    #[tokio::test]
    async fn test_failed_allocation_persists_nothing() {
        let flaky = Arc::new(FlakyStore::new(1, 0));
        let store = ProductStore::new(flaky.clone());

        let result = store.create(sofa()).await;
        assert!(matches!(result, Err(StoreError::Contention { .. })));
        assert!(store.list().await.unwrap().is_empty());

        let id = store.create(sofa()).await.unwrap();
        assert_eq!(id.sequence(), 1);
    }

    #[tokio::test]
    async fn test_failed_insert_burns_the_id() {
        let flaky = Arc::new(FlakyStore::new(0, 1));
        let store = ProductStore::new(flaky.clone());

        assert_err!(store.create(sofa()).await);
        assert!(store.list().await.unwrap().is_empty());
        assert_eq!(flaky.inner.counter_value(PRODUCT_COUNTER), 1);

        let id = store.create(sofa()).await.unwrap();
        assert_eq!(id.as_str(), "P000002");
    }

    #[tokio::test]
    async fn test_list_tolerates_sparse_and_unreadable_documents() {
        let (memory, store) = memory_store();
        store.create(sofa()).await.unwrap();

        let sparse = serde_json::json!({"id": "P000002", "tags": ["Spare"]});
        let broken = serde_json::json!({"id": "not-an-id", "name": "Ghost"});
        for raw in [sparse, broken] {
            memory
                .add(PRODUCTS_COLLECTION, raw.as_object().cloned().unwrap())
                .await
                .unwrap();
        }

        let mut products = store.list().await.unwrap();
        products.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(products.len(), 2);
        assert_eq!(products[0].name, "Sofa");
        assert_eq!(products[1].id.as_str(), "P000002");
        assert!(products[1].name.is_empty());
        assert!(products[1].category.is_empty());
        assert_eq!(products[1].tags, ["Spare"]);
    }
}
