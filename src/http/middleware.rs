//! Request middleware

use axum::{
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::app::AppState;
use crate::http::routes::AppError;

/// Methods that never modify the catalog
fn is_read_only(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Middleware throttling catalog writes through the shared write limiter.
/// Reads pass through untouched.
pub async fn limit_writes(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !is_read_only(request.method()) && state.write_limiter.check().is_err() {
        warn!(
            method = %request.method(),
            path = %request.uri().path(),
            "Write rate limit exceeded"
        );
        return Err(AppError::TooManyRequests);
    }

    Ok(next.run(request).await)
}
