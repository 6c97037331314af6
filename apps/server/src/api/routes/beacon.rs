//! Beacon route definitions

use crate::{api::handlers::beacon, state::AppState};
use axum::{routing::get, Router};

/// Create Beacon routes
///
/// - `GET /` (info)
/// - `GET|POST /filtering_terms`
/// - `GET|POST /{entity}`
/// - `GET|POST /{entity}/{id}`
/// - `GET|POST /{entity}/{id}/{response_entity}`
pub fn beacon_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(beacon::info))
        .route(
            "/filtering_terms",
            get(beacon::filtering_terms).post(beacon::filtering_terms),
        )
        .route(
            "/:entity",
            get(beacon::query_get).post(beacon::query_post),
        )
        .route(
            "/:entity/:id",
            get(beacon::query_get).post(beacon::query_post),
        )
        .route(
            "/:entity/:id/:response_entity",
            get(beacon::query_get).post(beacon::query_post),
        )
}
