//! In-process document store, used for local runs and tests

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{Document, DocumentId, DocumentStore, StoreError, StoredDocument, KEY_FIELD};

#[derive(Default)]
struct Collection {
    docs: HashMap<DocumentId, Document>,
    /// Secondary index: value of `KEY_FIELD` -> native handle
    by_key: HashMap<String, DocumentId>,
}

impl Collection {
    fn key_of(doc: &Document) -> Option<&str> {
        doc.get(KEY_FIELD).and_then(|v| v.as_str())
    }
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, Collection>,
    counters: HashMap<String, u64>,
}

/// Document store that lives in process memory.
///
/// The lock is never held across an `.await`, so every operation is a single
/// critical section. That makes `increment_counter` linearizable within the process.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter without incrementing it
    pub fn counter_value(&self, counter: &str) -> u64 {
        self.inner.lock().counters.get(counter).copied().unwrap_or(0)
    }

    /// Number of documents in a collection
    pub fn document_count(&self, collection: &str) -> usize {
        self.inner
            .lock()
            .collections
            .get(collection)
            .map(|c| c.docs.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn increment_counter(&self, counter: &str) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        let count = inner.counters.entry(counter.to_string()).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn add(&self, collection: &str, data: Document) -> Result<DocumentId, StoreError> {
        let id = DocumentId::new(Uuid::new_v4().to_string());

        let mut inner = self.inner.lock();
        let coll = inner.collections.entry(collection.to_string()).or_default();
        if let Some(key) = Collection::key_of(&data) {
            coll.by_key.insert(key.to_string(), id.clone());
        }
        coll.docs.insert(id.clone(), data);

        Ok(id)
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<StoredDocument>, StoreError> {
        let inner = self.inner.lock();
        let docs = inner
            .collections
            .get(collection)
            .map(|coll| {
                coll.docs
                    .iter()
                    .map(|(id, data)| StoredDocument {
                        id: id.clone(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(docs)
    }

    async fn find_by_key(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<StoredDocument>, StoreError> {
        let inner = self.inner.lock();
        let found = inner.collections.get(collection).and_then(|coll| {
            let id = coll.by_key.get(key)?;
            coll.docs.get(id).map(|data| StoredDocument {
                id: id.clone(),
                data: data.clone(),
            })
        });
        Ok(found)
    }

    async fn update(
        &self,
        collection: &str,
        id: &DocumentId,
        patch: Document,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let Some(coll) = inner.collections.get_mut(collection) else {
            return Ok(false);
        };
        let Some(doc) = coll.docs.get_mut(id) else {
            return Ok(false);
        };

        let old_key = Collection::key_of(doc).map(str::to_string);
        for (field, value) in patch {
            doc.insert(field, value);
        }
        let new_key = Collection::key_of(doc).map(str::to_string);

        if old_key != new_key {
            if let Some(old) = old_key {
                coll.by_key.remove(&old);
            }
            if let Some(new) = new_key {
                coll.by_key.insert(new, id.clone());
            }
        }

        Ok(true)
    }

    async fn delete(&self, collection: &str, id: &DocumentId) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let Some(coll) = inner.collections.get_mut(collection) else {
            return Ok(false);
        };
        let Some(doc) = coll.docs.remove(id) else {
            return Ok(false);
        };

        if let Some(key) = Collection::key_of(&doc) {
            if coll.by_key.get(key) == Some(id) {
                coll.by_key.remove(key);
            }
        }

        Ok(true)
    }
}
