//! HTTP surface: retrieval for agents, ingestion trigger and backlog drain.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::error::RagError;
use crate::ingest::{IngestReport, IngestRequest, Ingestor};
use crate::queue::{DrainReport, QueueWorker};
use crate::retrieval::{RetrievalResponse, RetrieveRequest, Retriever};

/// Engines shared by every handler.
#[derive(Clone)]
pub struct AppState {
    /// Query path.
    pub retriever: Arc<Retriever>,
    /// Document processing path.
    pub ingestor: Arc<Ingestor>,
    /// Backlog drain path.
    pub worker: Arc<QueueWorker>,
}

/// Error body returned by every route: `{"error": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// 400
    #[error("bad request: {0}")]
    BadRequest(String),
    /// 404
    #[error("not found: {0}")]
    NotFound(String),
    /// 502
    #[error("upstream failure: {0}")]
    Upstream(String),
}

impl From<RagError> for ApiError {
    fn from(err: RagError) -> Self {
        match err {
            RagError::Validation(_) => Self::BadRequest(err.to_string()),
            RagError::NotFound { .. } => Self::NotFound(err.to_string()),
            other => Self::Upstream(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Upstream(msg) => {
                error!(error = %msg, "request failed upstream");
                (StatusCode::BAD_GATEWAY, msg)
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Body of `POST /v1/documents/{id}/process`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessBody {
    /// Owning knowledge base.
    #[serde(default)]
    pub knowledge_base_id: String,
    /// Name stamped into chunk metadata.
    #[serde(default)]
    pub source_name: String,
    /// Extracted page text.
    #[serde(default)]
    pub pages: Vec<String>,
}

/// Body of `POST /v1/queue/drain`.
#[derive(Debug, Default, Deserialize)]
pub struct DrainBody {
    /// Items to drain, clamped to the configured ceiling.
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Builds the router with request tracing.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/retrieve", post(retrieve_handler))
        .route("/v1/documents/{id}/process", post(process_handler))
        .route("/v1/queue/drain", post(drain_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn retrieve_handler(
    State(state): State<AppState>,
    body: Result<Json<RetrieveRequest>, JsonRejection>,
) -> Result<Json<RetrievalResponse>, ApiError> {
    let Json(request) = body?;
    let response = state.retriever.retrieve(&request).await?;
    Ok(Json(response))
}

async fn process_handler(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    body: Result<Json<ProcessBody>, JsonRejection>,
) -> Result<Json<IngestReport>, ApiError> {
    let Json(body) = body?;
    let request = IngestRequest {
        document_id,
        knowledge_base_id: body.knowledge_base_id,
        source_name: body.source_name,
        pages: body.pages,
    };
    let report = state.ingestor.process(&request).await?;
    Ok(Json(report))
}

async fn drain_handler(
    State(state): State<AppState>,
    body: Result<Json<DrainBody>, JsonRejection>,
) -> Result<Json<DrainReport>, ApiError> {
    let Json(body) = body?;
    let report = state.worker.drain(body.limit).await?;
    Ok(Json(report))
}
