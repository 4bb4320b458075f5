use axum::extract::DefaultBodyLimit;
use axum::routing::any;
use axum::Router;

use crate::handlers;
use crate::state::AppState;

const MAX_BLOB_REQUEST_BYTES: usize = 2 * 1024 * 1024 * 1024;

/// The version probe answers on any method; everything else under the
/// base is classified by its trailing path segments, so a single wildcard
/// route feeds the dispatcher.
pub(crate) fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v2", any(handlers::api_version))
        .route("/v2/", any(handlers::api_version))
        .route("/v2/{*path}", any(handlers::dispatch))
        .layer(DefaultBodyLimit::max(MAX_BLOB_REQUEST_BYTES))
        .with_state(state)
}
