//! Beacon endpoint handlers
//!
//! Handles `/beacon/{entity}[/{id}[/{responseEntity}]]` queries, the
//! filtering-terms service and the info root, for GET and POST.

use crate::{
    api::params::RequestParameters,
    request_context::RequestMeta,
    services::{BeaconService, QueryTarget},
    state::AppState,
    Error, Result,
};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    response::Json,
    Extension,
};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

type QueryPairs = Query<Vec<(String, String)>>;

fn request_id(meta: Option<Extension<RequestMeta>>) -> String {
    meta.map(|Extension(m)| m.request_id)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Query-string parameters, overlaid with a JSON body when one is sent.
fn parameters(pairs: Vec<(String, String)>, body: Option<&Bytes>) -> Result<RequestParameters> {
    let mut params = RequestParameters::from_query(pairs);
    if let Some(body) = body.filter(|b| !b.iter().all(u8::is_ascii_whitespace)) {
        let json: JsonValue = serde_json::from_slice(body)
            .map_err(|e| Error::Validation(format!("request body is not valid JSON: {e}")))?;
        params.merge(RequestParameters::from_body(&json)?);
    }
    Ok(params)
}

fn target(state: &AppState, path: &HashMap<String, String>) -> Result<QueryTarget> {
    let entity = path
        .get("entity")
        .ok_or_else(|| Error::NotFound("missing entity".to_string()))?;
    let collection = state
        .config
        .entity_collection(entity)
        .ok_or_else(|| Error::NotFound(format!("unknown entity '{entity}'")))?
        .to_string();

    let response_collection = match path.get("response_entity") {
        Some(response_entity) => state
            .config
            .entity_collection(response_entity)
            .ok_or_else(|| Error::NotFound(format!("unknown entity '{response_entity}'")))?
            .to_string(),
        None => collection.clone(),
    };

    Ok(QueryTarget {
        collection,
        path_id: path.get("id").cloned(),
        response_collection,
    })
}

/// GET /beacon/{entity}[/{id}[/{responseEntity}]]
pub async fn query_get(
    State(state): State<AppState>,
    Path(path): Path<HashMap<String, String>>,
    meta: Option<Extension<RequestMeta>>,
    Query(pairs): QueryPairs,
) -> Result<Json<JsonValue>> {
    let target = target(&state, &path)?;
    let params = parameters(pairs, None)?;
    let response = BeaconService::new(state)
        .query(&request_id(meta), &target, &params)
        .await?;
    Ok(Json(response))
}

/// POST /beacon/{entity}[/{id}[/{responseEntity}]] with a Beacon v2 request body
pub async fn query_post(
    State(state): State<AppState>,
    Path(path): Path<HashMap<String, String>>,
    meta: Option<Extension<RequestMeta>>,
    Query(pairs): QueryPairs,
    body: Bytes,
) -> Result<Json<JsonValue>> {
    let target = target(&state, &path)?;
    let params = parameters(pairs, Some(&body))?;
    let response = BeaconService::new(state)
        .query(&request_id(meta), &target, &params)
        .await?;
    Ok(Json(response))
}

/// GET|POST /beacon/filtering_terms
pub async fn filtering_terms(
    State(state): State<AppState>,
    meta: Option<Extension<RequestMeta>>,
    Query(pairs): QueryPairs,
    body: Bytes,
) -> Result<Json<JsonValue>> {
    let params = parameters(pairs, Some(&body))?;
    let response = BeaconService::new(state)
        .filtering_terms(&request_id(meta), &params)
        .await?;
    Ok(Json(response))
}

/// GET /beacon
pub async fn info(State(state): State<AppState>) -> Result<Json<JsonValue>> {
    Ok(Json(BeaconService::new(state).info().await?))
}
