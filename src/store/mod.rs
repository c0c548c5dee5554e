//! Document store backends and the product repository built on top of them

pub mod memory;
pub mod products;
pub mod supabase;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use memory::MemoryStore;
pub use products::{NewProduct, Product, ProductId, ProductPatch, ProductStore};
pub use supabase::{SupabaseClient, SupabaseError};

/// A schemaless document as stored by a backend
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Field every keyed collection is indexed on
pub const KEY_FIELD: &str = "id";

/// Native handle a backend assigns to a document.
///
/// Distinct from the logical key stored inside the document itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A document together with its native handle
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: DocumentId,
    pub data: Document,
}

/// Operations a document database must provide.
///
/// `increment_counter` is the only operation with a cross-caller correctness
/// requirement: it must be atomic against the backend itself, not a local lock,
/// since callers can live in different processes.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short name used in logs and the health endpoint
    fn backend_name(&self) -> &'static str;

    /// Atomically increment the named counter and return the new value.
    /// A missing counter starts at 0.
    async fn increment_counter(&self, counter: &str) -> Result<u64, StoreError>;

    /// Append a new document and return its native handle
    async fn add(&self, collection: &str, data: Document) -> Result<DocumentId, StoreError>;

    /// Fetch every document in a collection, in no particular order
    async fn get_all(&self, collection: &str) -> Result<Vec<StoredDocument>, StoreError>;

    /// Look up a document by the value of its [`KEY_FIELD`]
    async fn find_by_key(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<StoredDocument>, StoreError>;

    /// Shallow-merge `patch` into a document. Returns false if nothing matched.
    async fn update(
        &self,
        collection: &str,
        id: &DocumentId,
        patch: Document,
    ) -> Result<bool, StoreError>;

    /// Remove a document. Returns false if nothing matched.
    async fn delete(&self, collection: &str, id: &DocumentId) -> Result<bool, StoreError>;
}

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Supabase(#[from] SupabaseError),

    #[error("Counter '{counter}' still contended after {attempts} attempts")]
    Contention { counter: String, attempts: u32 },

    #[error("Failed to (de)serialize document: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed document: {0}")]
    MalformedDocument(String),
}
