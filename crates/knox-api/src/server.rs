//! Axum server and routes.

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use knox_ingest::{IngestBatch, IngestCursors, IngestJob, Ingestor};
use knox_store::{StoreRouter, WriteReport};
use knox_types::{
    BackendError, CiliumLog, EventPage, EventQuery, KubeArmorLog, NetworkPolicy, PodFilter,
    PolicyFilter, PolicyKey, PolicyKind, StoreError, SummaryRecord, SystemPolicy, SystemSummary,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Response envelope shared by every JSON route.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: u16,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            code: 200,
            message: "Success".to_string(),
            data: Some(data),
        })
    }

    fn error(code: u16, message: impl Into<String>) -> Json<Self> {
        Json(Self {
            code,
            message: message.into(),
            data: None,
        })
    }
}

fn store_error_code(e: &StoreError) -> u16 {
    match e {
        StoreError::NoBackend => 503,
        StoreError::Backend(BackendError::NotFound(_)) => 404,
        StoreError::Backend(BackendError::Conflict(_)) => 409,
        StoreError::Backend(_) => 500,
    }
}

fn respond<T>(result: Result<T, StoreError>) -> Json<ApiResponse<T>> {
    match result {
        Ok(data) => ApiResponse::ok(data),
        Err(e) => ApiResponse::error(store_error_code(&e), e.to_string()),
    }
}

pub struct AppState {
    pub store: Arc<StoreRouter>,
    pub ingestor: Arc<dyn Ingestor>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/policies/network",
            get(handle_get_network_policies)
                .post(handle_insert_network_policies)
                .put(handle_update_network_policies),
        )
        .route("/policies/network/selector", post(handle_network_by_selector))
        .route(
            "/policies/system",
            get(handle_get_system_policies)
                .post(handle_insert_system_policies)
                .put(handle_update_system_policies),
        )
        .route("/policies/system/selector", post(handle_system_by_selector))
        .route("/policies/supersede", post(handle_supersede))
        .route("/logs/system", post(handle_system_logs))
        .route("/logs/network", post(handle_network_logs))
        .route("/logs/pods", post(handle_pod_names))
        .route("/summary", post(handle_summary))
        .route("/ingest", post(handle_ingest))
        .route("/ingest/status", get(handle_ingest_status))
        .route("/ingest/cursors", get(handle_ingest_cursors))
        .route("/health", get(handle_health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct SelectorRequest {
    #[serde(default)]
    pub filter: PolicyFilter,
    #[serde(default)]
    pub selector: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct SupersedeRequest {
    pub kind: PolicyKind,
    pub outdated: PolicyKey,
    pub latest: PolicyKey,
}

#[derive(Debug, Deserialize)]
pub struct IngestStatusQuery {
    pub job_id: Option<String>,
}

async fn handle_get_network_policies(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<PolicyFilter>,
) -> Json<ApiResponse<Vec<NetworkPolicy>>> {
    respond(state.store.get_network_policies(&filter).await)
}

async fn handle_insert_network_policies(
    State(state): State<Arc<AppState>>,
    Json(policies): Json<Vec<NetworkPolicy>>,
) -> Json<ApiResponse<WriteReport>> {
    ApiResponse::ok(state.store.insert_network_policies(&policies).await)
}

async fn handle_update_network_policies(
    State(state): State<Arc<AppState>>,
    Json(policies): Json<Vec<NetworkPolicy>>,
) -> Json<ApiResponse<WriteReport>> {
    ApiResponse::ok(state.store.update_network_policies(&policies).await)
}

async fn handle_network_by_selector(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SelectorRequest>,
) -> Json<ApiResponse<Vec<NetworkPolicy>>> {
    respond(
        state
            .store
            .get_network_policies_by_selector(&req.filter, &req.selector)
            .await,
    )
}

async fn handle_get_system_policies(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<PolicyFilter>,
) -> Json<ApiResponse<Vec<SystemPolicy>>> {
    respond(state.store.get_system_policies(&filter).await)
}

async fn handle_insert_system_policies(
    State(state): State<Arc<AppState>>,
    Json(policies): Json<Vec<SystemPolicy>>,
) -> Json<ApiResponse<WriteReport>> {
    ApiResponse::ok(state.store.insert_system_policies(&policies).await)
}

async fn handle_update_system_policies(
    State(state): State<Arc<AppState>>,
    Json(policies): Json<Vec<SystemPolicy>>,
) -> Json<ApiResponse<WriteReport>> {
    ApiResponse::ok(state.store.update_system_policies(&policies).await)
}

async fn handle_system_by_selector(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SelectorRequest>,
) -> Json<ApiResponse<Vec<SystemPolicy>>> {
    respond(
        state
            .store
            .get_system_policies_by_selector(&req.filter, &req.selector)
            .await,
    )
}

async fn handle_supersede(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SupersedeRequest>,
) -> Json<ApiResponse<()>> {
    respond(
        state
            .store
            .supersede_policy(req.kind, &req.outdated, &req.latest)
            .await,
    )
}

async fn handle_system_logs(
    State(state): State<Arc<AppState>>,
    Json(query): Json<EventQuery<KubeArmorLog>>,
) -> Json<ApiResponse<EventPage<KubeArmorLog>>> {
    respond(state.store.get_system_logs(&query).await)
}

async fn handle_network_logs(
    State(state): State<Arc<AppState>>,
    Json(query): Json<EventQuery<CiliumLog>>,
) -> Json<ApiResponse<EventPage<CiliumLog>>> {
    respond(state.store.get_network_logs(&query).await)
}

async fn handle_pod_names(
    State(state): State<Arc<AppState>>,
    Json(filter): Json<PodFilter>,
) -> Json<ApiResponse<Vec<String>>> {
    respond(state.store.get_pod_names(&filter).await)
}

async fn handle_summary(
    State(state): State<Arc<AppState>>,
    Json(filter): Json<SystemSummary>,
) -> Json<ApiResponse<Vec<SummaryRecord>>> {
    respond(state.store.get_system_summaries(&filter).await)
}

async fn handle_ingest(
    State(state): State<Arc<AppState>>,
    Json(batch): Json<IngestBatch>,
) -> Json<ApiResponse<serde_json::Value>> {
    match state.ingestor.submit(batch).await {
        Ok(job_id) => ApiResponse::ok(serde_json::json!({ "job_id": job_id })),
        Err(knox_ingest::IngestError::EmptyBatch) => ApiResponse::error(400, "empty batch"),
        Err(e) => ApiResponse::error(500, e.to_string()),
    }
}

async fn handle_ingest_status(
    State(state): State<Arc<AppState>>,
    Query(q): Query<IngestStatusQuery>,
) -> Json<ApiResponse<IngestJob>> {
    let Some(job_id) = q.job_id.as_deref() else {
        return ApiResponse::error(400, "job_id is required");
    };
    match state.ingestor.get_status(job_id).await {
        Ok(Some(job)) => ApiResponse::ok(job),
        Ok(None) => ApiResponse::error(404, "Job not found"),
        Err(e) => ApiResponse::error(500, e.to_string()),
    }
}

async fn handle_ingest_cursors(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<IngestCursors>> {
    ApiResponse::ok(state.ingestor.cursors().await)
}

async fn handle_health() -> &'static str {
    "ok"
}
