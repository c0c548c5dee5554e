//! Supabase REST API client using service_role key

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Document, DocumentId, DocumentStore, StoreError, StoredDocument, KEY_FIELD};
use crate::config::SupabaseConfig;

/// Table holding one row per named counter
const COUNTERS_TABLE: &str = "counters";

/// Column carrying the native row handle in every document table
const NATIVE_ID_COLUMN: &str = "doc_id";

/// Query pairs for a PostgREST request
type Query<'a> = [(&'a str, String)];

/// PostgREST equality filter value
fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{}", value)
}

/// Supabase client for server-side database operations
/// Uses service_role key which bypasses RLS - handle with care!
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    service_role_key: String,
    counter_max_retries: u32,
}

impl SupabaseClient {
    pub fn new(
        config: &SupabaseConfig,
        timeout: Duration,
        counter_max_retries: u32,
    ) -> Result<Self, SupabaseError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SupabaseError::Request)?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            service_role_key: config.service_role_key.clone(),
            counter_max_retries: counter_max_retries.max(1),
        })
    }

    /// Get the REST API URL for a table
    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// Attach the service role credentials shared by every request
    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .header("Content-Type", "application/json")
    }

    /// Turn a non-2xx response into an API error
    async fn check(response: Response) -> Result<Response, SupabaseError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SupabaseError::Api { status: status.as_u16(), body });
        }
        Ok(response)
    }

    /// Make an authenticated GET request
    pub async fn get<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &Query<'_>,
    ) -> Result<Vec<T>, SupabaseError> {
        let response = self
            .authed(self.client.get(self.rest_url(table)).query(query))
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(SupabaseError::Parse)
    }

    /// Make an authenticated GET request expecting a single row
    pub async fn get_one<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &Query<'_>,
    ) -> Result<Option<T>, SupabaseError> {
        let response = self
            .authed(self.client.get(self.rest_url(table)).query(query))
            .header("Accept", "application/vnd.pgrst.object+json")
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        if response.status() == reqwest::StatusCode::NOT_ACCEPTABLE {
            // No rows found
            return Ok(None);
        }

        Self::check(response)
            .await?
            .json()
            .await
            .map(Some)
            .map_err(SupabaseError::Parse)
    }

    /// Make an authenticated POST request (insert)
    pub async fn insert<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        table: &str,
        data: &T,
    ) -> Result<R, SupabaseError> {
        let response = self
            .authed(self.client.post(self.rest_url(table)))
            .header("Prefer", "return=representation")
            .json(data)
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        // PostgREST returns an array, get first element
        let results: Vec<R> = Self::check(response)
            .await?
            .json()
            .await
            .map_err(SupabaseError::Parse)?;
        results
            .into_iter()
            .next()
            .ok_or(SupabaseError::NoRowReturned)
    }

    /// Insert unless a row with the same `on_conflict` columns already exists
    pub async fn insert_ignoring_duplicates<T: Serialize + ?Sized>(
        &self,
        table: &str,
        data: &T,
        on_conflict: &str,
    ) -> Result<(), SupabaseError> {
        let response = self
            .authed(self.client.post(self.rest_url(table)))
            .query(&[("on_conflict", on_conflict)])
            .header("Prefer", "resolution=ignore-duplicates,return=minimal")
            .json(data)
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        Self::check(response).await?;
        Ok(())
    }

    /// Make an authenticated PATCH request, returning the rows it touched
    pub async fn update<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        table: &str,
        query: &Query<'_>,
        data: &T,
    ) -> Result<Vec<R>, SupabaseError> {
        let response = self
            .authed(self.client.patch(self.rest_url(table)).query(query))
            .header("Prefer", "return=representation")
            .json(data)
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(SupabaseError::Parse)
    }

    /// Make an authenticated DELETE request, returning the rows it removed
    pub async fn delete<R: DeserializeOwned>(
        &self,
        table: &str,
        query: &Query<'_>,
    ) -> Result<Vec<R>, SupabaseError> {
        let response = self
            .authed(self.client.delete(self.rest_url(table)).query(query))
            .header("Prefer", "return=representation")
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(SupabaseError::Parse)
    }
}

/// Counter row as stored in the counters table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterRow {
    pub name: String,
    pub count: u64,
}

#[derive(Debug, Serialize)]
struct CounterUpdate {
    count: u64,
}

impl SupabaseClient {
    /// Read a counter row, creating it at 0 first if it does not exist yet
    async fn read_or_seed_counter(&self, counter: &str) -> Result<CounterRow, StoreError> {
        let query = [("name", eq(counter))];
        if let Some(row) = self.get_one(COUNTERS_TABLE, &query).await? {
            return Ok(row);
        }

        debug!(counter, "Seeding missing counter row");
        let seed = CounterRow {
            name: counter.to_string(),
            count: 0,
        };
        self.insert_ignoring_duplicates(COUNTERS_TABLE, &seed, "name")
            .await?;

        // A concurrent seeder may have won; either way the row exists now
        self.get_one(COUNTERS_TABLE, &query).await?.ok_or_else(|| {
            StoreError::MalformedDocument(format!("counter '{}' missing after seeding", counter))
        })
    }
}

/// Split the native handle column out of a returned row
fn into_stored(mut row: Document) -> Result<StoredDocument, StoreError> {
    let id = match row.remove(NATIVE_ID_COLUMN) {
        Some(serde_json::Value::String(id)) => DocumentId::new(id),
        other => {
            return Err(StoreError::MalformedDocument(format!(
                "expected string `{}`, got {:?}",
                NATIVE_ID_COLUMN, other
            )))
        }
    };
    Ok(StoredDocument { id, data: row })
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(10 * u64::from(attempt.min(20)))
}

#[async_trait]
impl DocumentStore for SupabaseClient {
    fn backend_name(&self) -> &'static str {
        "supabase"
    }

    /// Optimistic compare-and-swap on the counter row.
    ///
    /// The PATCH only matches while `count` still holds the value we read, so
    /// two callers that read the same value cannot both succeed. Only PATCHes
    /// count against the retry budget; seeding a missing row does not.
    async fn increment_counter(&self, counter: &str) -> Result<u64, StoreError> {
        for attempt in 1..=self.counter_max_retries {
            let row = self.read_or_seed_counter(counter).await?;

            let next = row.count + 1;
            let swapped: Vec<CounterRow> = self
                .update(
                    COUNTERS_TABLE,
                    &[("name", eq(counter)), ("count", eq(row.count))],
                    &CounterUpdate { count: next },
                )
                .await?;

            if !swapped.is_empty() {
                return Ok(next);
            }

            debug!(counter, attempt, "Counter contended, retrying");
            tokio::time::sleep(backoff(attempt)).await;
        }

        warn!(counter, attempts = self.counter_max_retries, "Counter allocation gave up");
        Err(StoreError::Contention {
            counter: counter.to_string(),
            attempts: self.counter_max_retries,
        })
    }

    async fn add(&self, collection: &str, mut data: Document) -> Result<DocumentId, StoreError> {
        let doc_id = Uuid::new_v4().to_string();
        data.insert(NATIVE_ID_COLUMN.to_string(), doc_id.clone().into());

        let _row: Document = self.insert(collection, &data).await?;
        Ok(DocumentId::new(doc_id))
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<StoredDocument>, StoreError> {
        let rows: Vec<Document> = self
            .get(collection, &[("select", "*".to_string())])
            .await?;
        rows.into_iter().map(into_stored).collect()
    }

    async fn find_by_key(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<StoredDocument>, StoreError> {
        let row: Option<Document> = self.get_one(collection, &[(KEY_FIELD, eq(key))]).await?;
        row.map(into_stored).transpose()
    }

    async fn update(
        &self,
        collection: &str,
        id: &DocumentId,
        patch: Document,
    ) -> Result<bool, StoreError> {
        let rows: Vec<Document> = SupabaseClient::update(
            self,
            collection,
            &[(NATIVE_ID_COLUMN, eq(id))],
            &patch,
        )
        .await?;
        Ok(!rows.is_empty())
    }

    async fn delete(&self, collection: &str, id: &DocumentId) -> Result<bool, StoreError> {
        let rows: Vec<Document> =
            SupabaseClient::delete(self, collection, &[(NATIVE_ID_COLUMN, eq(id))]).await?;
        Ok(!rows.is_empty())
    }
}

/// Supabase errors
#[derive(Debug, thiserror::Error)]
pub enum SupabaseError {
    #[error("HTTP request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(#[source] reqwest::Error),

    #[error("No row returned from insert")]
    NoRowReturned,
}
