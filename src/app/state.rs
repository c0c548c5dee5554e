//! Application state shared across routes

use std::sync::Arc;

use tracing::info;

use crate::catalog::HouseRegistry;
use crate::config::{Config, StoreBackend};
use crate::store::{DocumentStore, MemoryStore, ProductStore, SupabaseClient, SupabaseError};
use crate::util::rate_limit::{create_limiter, Limiter};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub products: ProductStore,
    pub houses: Arc<HouseRegistry>,
    pub write_limiter: Arc<Limiter>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, SupabaseError> {
        // Initialize the document store the products live in
        let backend: Arc<dyn DocumentStore> = match &config.store_backend {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::Supabase(supabase) => Arc::new(SupabaseClient::new(
                supabase,
                config.store_timeout,
                config.counter_max_retries,
            )?),
        };

        Ok(Self::with_backend(config, backend))
    }

    /// Build state over an already constructed backend
    pub fn with_backend(config: Config, backend: Arc<dyn DocumentStore>) -> Self {
        info!(backend = backend.backend_name(), "Using document store");

        let products = ProductStore::new(backend);
        let houses = Arc::new(config.houses.clone());
        let write_limiter = create_limiter(config.write_rate_limit);

        Self {
            config: Arc::new(config),
            products,
            houses,
            write_limiter,
        }
    }
}
