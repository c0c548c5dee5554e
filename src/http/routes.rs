//! HTTP route definitions

use axum::{
    extract::{Path, Query, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::error;

use crate::app::AppState;
use crate::catalog::forms::{suggestions, Suggestions};
use crate::catalog::views::{self, Grouped, HouseSummary};
use crate::catalog::{EditItemForm, FormError, House, NewItemForm};
use crate::http::middleware::limit_writes;
use crate::store::{Product, ProductId, StoreError};
use crate::util::time::uptime_secs;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true);

    let catalog_routes = Router::new()
        .route("/houses", get(houses_handler))
        .route("/houses/:house_id/items", get(house_items_handler))
        .route("/suggestions", get(suggestions_handler))
        .route("/items", get(search_handler).post(create_item_handler))
        .route(
            "/items/:id",
            get(get_item_handler)
                .patch(update_item_handler)
                .delete(delete_item_handler),
        )
        .layer(middleware::from_fn_with_state(state.clone(), limit_writes));

    Router::new()
        .route("/health", get(health_handler))
        .merge(catalog_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    store_backend: &'static str,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        store_backend: state.products.backend_name(),
    })
}

// ============================================================================
// Listing and search
// ============================================================================

/// How a listing is presented
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
enum View {
    #[default]
    All,
    Category,
    Location,
    House,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Listing {
    Flat(Vec<Product>),
    Grouped(Grouped),
}

impl Listing {
    fn build(products: Vec<Product>, view: View, state: &AppState) -> Self {
        match view {
            View::All => Listing::Flat(products),
            View::Category => Listing::Grouped(views::group_by_category(products)),
            View::Location => Listing::Grouped(views::group_by_location(products)),
            View::House => Listing::Grouped(views::group_by_house(products, &state.houses)),
        }
    }
}

#[derive(Serialize)]
struct HousesResponse {
    houses: Vec<HouseSummary>,
}

async fn houses_handler(State(state): State<AppState>) -> Result<Json<HousesResponse>, AppError> {
    let products = state.products.list().await?;

    Ok(Json(HousesResponse {
        houses: views::house_summaries(&products, &state.houses),
    }))
}

#[derive(Deserialize)]
struct ViewQuery {
    #[serde(default)]
    view: View,
}

#[derive(Serialize)]
struct HouseItemsResponse {
    house: House,
    view: View,
    total: usize,
    items: Listing,
}

async fn house_items_handler(
    State(state): State<AppState>,
    Path(house_id): Path<String>,
    Query(query): Query<ViewQuery>,
) -> Result<Json<HouseItemsResponse>, AppError> {
    let house = state
        .houses
        .get(&house_id)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("House {} not found", house_id)))?;

    let items = views::in_house(state.products.list().await?, &house_id);

    Ok(Json(HouseItemsResponse {
        house,
        view: query.view,
        total: items.len(),
        items: Listing::build(items, query.view, &state),
    }))
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
    #[serde(default)]
    view: View,
}

#[derive(Serialize)]
struct SearchResponse {
    query: String,
    searched: bool,
    view: View,
    total: usize,
    items: Listing,
}

async fn search_handler(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, AppError> {
    // Blank queries never hit the store
    let results = if query.q.trim().is_empty() {
        None
    } else {
        views::search(state.products.list().await?, &query.q)
    };

    let searched = results.is_some();
    let results = results.unwrap_or_default();

    Ok(Json(SearchResponse {
        query: query.q,
        searched,
        view: query.view,
        total: results.len(),
        items: Listing::build(results, query.view, &state),
    }))
}

async fn suggestions_handler() -> Json<Suggestions> {
    Json(suggestions())
}

// ============================================================================
// Item endpoints
// ============================================================================

fn parse_id(raw: &str) -> Result<ProductId, AppError> {
    raw.parse()
        .map_err(|e: crate::store::products::InvalidProductId| AppError::BadRequest(e.to_string()))
}

#[derive(Serialize)]
struct CreateItemResponse {
    id: ProductId,
}

async fn create_item_handler(
    State(state): State<AppState>,
    Json(form): Json<NewItemForm>,
) -> Result<(StatusCode, Json<CreateItemResponse>), AppError> {
    let fields = form.into_new_product(&state.houses)?;
    let id = state.products.create(fields).await?;

    Ok((StatusCode::CREATED, Json(CreateItemResponse { id })))
}

async fn get_item_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Product>, AppError> {
    let id = parse_id(&id)?;

    state
        .products
        .get_by_id(&id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Item {} not found", id)))
}

async fn update_item_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(form): Json<EditItemForm>,
) -> Result<Json<Product>, AppError> {
    let id = parse_id(&id)?;
    let patch = form.into_patch(&state.houses)?;

    if !state.products.update(&id, patch).await? {
        return Err(AppError::NotFound(format!("Item {} not found", id)));
    }

    // May have been deleted in between
    state
        .products
        .get_by_id(&id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Item {} not found", id)))
}

async fn delete_item_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    state.products.delete(&id).await?;

    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Too many requests")]
    TooManyRequests,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<FormError> for AppError {
    fn from(err: FormError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        error!(error = %err, "Store operation failed");
        AppError::Internal(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::TooManyRequests => {
                (StatusCode::TOO_MANY_REQUESTS, "Too many requests".to_string())
            }
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::catalog::HouseRegistry;
    use crate::config::{Config, StoreBackend};
    use crate::store::MemoryStore;

    fn test_config(write_rate_limit: u32) -> Config {
        Config {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            log_level: "debug".to_string(),
            store_backend: StoreBackend::Memory,
            counter_max_retries: 3,
            store_timeout: Duration::from_secs(1),
            houses: HouseRegistry::default(),
            client_origin: "http://localhost:3000".to_string(),
            write_rate_limit,
        }
    }

    fn test_router() -> Router {
        let state = AppState::with_backend(test_config(1000), Arc::new(MemoryStore::new()));
        build_router(state)
    }

    async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create(router: &Router, name: &str, tags: &[&str], house: &str) -> String {
        let (status, body) = send(
            router,
            Method::POST,
            "/items",
            Some(json!({
                "name": name,
                "category": "Electronics",
                "location": "Living room",
                "tags": tags,
                "houseId": house,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let router = test_router();
        let (status, body) = send(&router, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["store_backend"], "memory");
    }

    #[tokio::test]
    async fn test_item_lifecycle() {
        let router = test_router();
        let id = create(&router, "TV", &["Living", "Samsung", "Living"], "1").await;
        assert_eq!(id, "P000001");

        let (status, item) = send(&router, Method::GET, "/items/P000001", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(item["name"], "TV");
        assert_eq!(item["tags"], json!(["Living", "Samsung"]));
        assert_eq!(item["houseId"], "1");

        let (status, item) = send(
            &router,
            Method::PATCH,
            "/items/P000001",
            Some(json!({"name": "Television"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(item["name"], "Television");
        assert_eq!(item["category"], "Electronics");

        let (status, _) = send(&router, Method::DELETE, "/items/P000001", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&router, Method::DELETE, "/items/P000001", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = send(&router, Method::GET, "/items/P000001", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("P000001"));
    }

    #[tokio::test]
    async fn test_missing_and_malformed_ids() {
        let router = test_router();

        let (status, _) = send(
            &router,
            Method::PATCH,
            "/items/P000404",
            Some(json!({"name": "X"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&router, Method::GET, "/items/banana", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_forms() {
        let router = test_router();

        let (status, body) = send(
            &router,
            Method::POST,
            "/items",
            Some(json!({"name": " ", "category": "Books", "location": "Study"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "name is required");

        let (status, _) = send(
            &router,
            Method::POST,
            "/items",
            Some(json!({"name": "Desk", "category": "Furniture", "location": "Study", "houseId": "99"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Nothing was allocated for rejected forms
        assert_eq!(create(&router, "Desk", &[], "3").await, "P000001");
    }

    #[tokio::test]
    async fn test_search() {
        let router = test_router();
        create(&router, "Sofa", &["Living"], "1").await;
        create(&router, "TV", &["Living", "Samsung"], "2").await;

        let (status, body) = send(&router, Method::GET, "/items?q=sam", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["searched"], true);
        assert_eq!(body["total"], 1);
        assert_eq!(body["items"][0]["name"], "TV");

        let (_, body) = send(&router, Method::GET, "/items?q=living&view=house", None).await;
        assert_eq!(body["total"], 2);
        assert_eq!(body["items"]["Anchor"][0]["name"], "Sofa");
        assert_eq!(body["items"]["Calvary"][0]["name"], "TV");

        let (_, body) = send(&router, Method::GET, "/items?q=%20%20", None).await;
        assert_eq!(body["searched"], false);
        assert_eq!(body["items"], json!([]));
    }

    #[tokio::test]
    async fn test_houses_and_house_items() {
        let router = test_router();
        create(&router, "TV", &[], "1").await;
        create(&router, "Fridge", &[], "1").await;
        create(&router, "Bed", &[], "2").await;

        let (status, body) = send(&router, Method::GET, "/houses", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["houses"][0]["itemCount"], 2);
        assert_eq!(body["houses"][1]["itemCount"], 1);
        assert_eq!(body["houses"][3]["name"], "Fisherman");

        let (status, body) =
            send(&router, Method::GET, "/houses/1/items?view=category", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["house"]["name"], "Anchor");
        assert_eq!(body["total"], 2);
        assert_eq!(body["items"]["Electronics"].as_array().unwrap().len(), 2);

        let (status, _) = send(&router, Method::GET, "/houses/77/items", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_suggestions() {
        let router = test_router();
        let (status, body) = send(&router, Method::GET, "/suggestions", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["categories"][0], "Furniture");
        assert_eq!(body["locations"].as_array().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_writes_are_rate_limited() {
        let state = AppState::with_backend(test_config(1), Arc::new(MemoryStore::new()));
        let router = build_router(state);

        create(&router, "Lamp", &[], "").await;
        let (status, _) = send(
            &router,
            Method::POST,
            "/items",
            Some(json!({"name": "Rug", "category": "Other", "location": "Other"})),
        )
        .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

        // Reads are never throttled
        let (status, _) = send(&router, Method::GET, "/items/P000001", None).await;
        assert_eq!(status, StatusCode::OK);
    }
}
