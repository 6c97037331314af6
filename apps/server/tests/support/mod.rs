pub mod fixtures;

use anyhow::Context as _;
use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, Method, Request, StatusCode},
    Router,
};
use beacon_query::{MemoryDocumentStore, MemoryHandoverBackend};
use beacon_server::{api::create_router, AppState, Config};
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceExt as _;

pub use fixtures::*;

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryDocumentStore>,
    pub handovers: Arc<MemoryHandoverBackend>,
}

impl TestApp {
    pub async fn new() -> anyhow::Result<Self> {
        Self::new_with_config(|_| {}).await
    }

    /// App on seeded in-memory stores; `configure` runs before state is built.
    pub async fn new_with_config(configure: impl FnOnce(&mut Config)) -> anyhow::Result<Self> {
        let mut config = Config::default();
        config.beacon.definitions_file = Some(PathBuf::from("config/definitions.yaml"));
        config.beacon.schemas_dir = PathBuf::from("schemas");
        config.beacon.default_datasets = vec![DATASET.to_string()];
        configure(&mut config);

        let store = Arc::new(MemoryDocumentStore::new());
        seed(&store).await;
        let handovers = Arc::new(MemoryHandoverBackend::new());

        let state = AppState::with_stores(config, store.clone(), handovers.clone())
            .await
            .context("initialize AppState")?;
        let router = create_router(state.clone());

        Ok(Self {
            router,
            state,
            store,
            handovers,
        })
    }

    pub async fn request(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<Bytes>,
    ) -> anyhow::Result<(StatusCode, HeaderMap, Bytes)> {
        let request = Request::builder()
            .method(method)
            .uri(path_and_query)
            .header("host", "example.org")
            .header("accept", "application/json")
            .header("content-type", "application/json")
            .body(match body {
                Some(bytes) => Body::from(bytes),
                None => Body::empty(),
            })
            .context("build request")?;

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .context("dispatch request")?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .context("read response body")?;

        Ok((status, headers, body))
    }

    pub async fn get_json(&self, path_and_query: &str) -> anyhow::Result<(StatusCode, JsonValue)> {
        let (status, _, body) = self.request(Method::GET, path_and_query, None).await?;
        Ok((status, parse_json(&body)?))
    }

    pub async fn post_json(
        &self,
        path_and_query: &str,
        body: &JsonValue,
    ) -> anyhow::Result<(StatusCode, JsonValue)> {
        let bytes = Bytes::from(serde_json::to_vec(body)?);
        let (status, _, body) = self.request(Method::POST, path_and_query, Some(bytes)).await?;
        Ok((status, parse_json(&body)?))
    }
}

fn parse_json(body: &Bytes) -> anyhow::Result<JsonValue> {
    serde_json::from_slice(body)
        .with_context(|| format!("response is not JSON: {}", String::from_utf8_lossy(body)))
}

/// Ids of the records in a result set, in response order.
pub fn record_ids(result_set: &JsonValue) -> Vec<String> {
    result_set["results"]
        .as_array()
        .map(|results| {
            results
                .iter()
                .filter_map(|r| r["id"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
