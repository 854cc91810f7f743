//! JSON HTTP server exposing the engine operations.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/knowledge/load` | Ingest vendor records (`?incremental=true`, `?source=local\|remote`) |
//! | `POST` | `/answer` | Answer a question (`{question, vendor?, k?}`) |
//! | `GET`  | `/analytics` | Spend analytics (`?period=month\|quarter\|year\|all`) |
//! | `DELETE` | `/context` | Delete all indexed knowledge |
//! | `GET`  | `/stats` | Vector store size summary |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Engine operations fold their own failures into structured bodies with a
//! `success` flag, so handlers return 200 for completed operations and the
//! error schema below only for malformed requests:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! dashboards.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::analytics::AnalyticsReport;
use crate::engine::{Engine, LoadSource};
use crate::models::{AnswerOutcome, LoadOutcome, ResetOutcome, StoreStats};

/// Starts the HTTP server on the configured bind address. Runs until the
/// process is terminated.
pub async fn run_server(engine: Engine) -> anyhow::Result<()> {
    let bind_addr = engine.config().server.bind.clone();
    let state = Arc::new(engine);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = router(state);
    let app = app.layer(cors);

    info!(addr = %bind_addr, "server listening");
    println!("VendorIQ server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: Arc<Engine>) -> Router {
    Router::new()
        .route("/knowledge/load", post(handle_load))
        .route("/answer", post(handle_answer))
        .route("/analytics", get(handle_analytics))
        .route("/context", delete(handle_reset))
        .route("/stats", get(handle_stats))
        .route("/health", get(handle_health))
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /knowledge/load ============

#[derive(Deserialize)]
struct LoadParams {
    #[serde(default)]
    incremental: bool,
    #[serde(default)]
    source: Option<String>,
}

async fn handle_load(
    State(engine): State<Arc<Engine>>,
    Query(params): Query<LoadParams>,
) -> Result<Json<LoadOutcome>, AppError> {
    let source = match params.source.as_deref() {
        None | Some("local") => LoadSource::Local,
        Some("remote") => LoadSource::Remote,
        Some(other) => {
            return Err(bad_request(format!(
                "unknown source '{}': must be local or remote",
                other
            )))
        }
    };

    Ok(Json(engine.load(params.incremental, source).await))
}

// ============ POST /answer ============

#[derive(Deserialize)]
struct AnswerRequest {
    question: String,
    #[serde(default)]
    vendor: Option<String>,
    #[serde(default)]
    k: Option<usize>,
}

async fn handle_answer(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<AnswerRequest>,
) -> Result<Json<AnswerOutcome>, AppError> {
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    Ok(Json(
        engine
            .answer(&req.question, req.vendor.as_deref(), req.k)
            .await,
    ))
}

// ============ GET /analytics ============

#[derive(Deserialize)]
struct AnalyticsParams {
    #[serde(default = "default_period")]
    period: String,
}

fn default_period() -> String {
    "all".to_string()
}

async fn handle_analytics(
    State(engine): State<Arc<Engine>>,
    Query(params): Query<AnalyticsParams>,
) -> Json<AnalyticsReport> {
    Json(engine.analytics(&params.period).await)
}

// ============ DELETE /context ============

async fn handle_reset(State(engine): State<Arc<Engine>>) -> Json<ResetOutcome> {
    Json(engine.reset().await)
}

// ============ GET /stats ============

async fn handle_stats(State(engine): State<Arc<Engine>>) -> Json<StoreStats> {
    Json(engine.stats().await)
}
