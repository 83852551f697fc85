//! HTTP query service.
//!
//! Exposes the table agent over a small JSON API for browser front-ends.
//! The [`AppContext`] is built once before binding and shared by every
//! request through axum `State`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/query` | Answer a natural-language question about the table |
//! | `GET`  | `/health` | Health check (returns version and sampled row count) |
//!
//! # Error Contract
//!
//! Any failure while answering a query becomes a `500` with the failure's
//! description:
//!
//! ```json
//! { "detail": "Ollama connection error (is it running at http://localhost:11434?): ..." }
//! ```
//!
//! The process keeps serving; one failed query does not affect the next.
//! Request bodies that are not `{"query": "<text>"}` are rejected by the
//! JSON extractor before reaching the agent.
//!
//! # CORS
//!
//! Only `[server].cors_origin` is allowed, with credentials. Requested
//! methods and headers are mirrored back for that origin.

use anyhow::Context;
use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};

use crate::config::Config;
use crate::context::AppContext;
use crate::progress::IngestProgressReporter;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    ctx: Arc<AppContext>,
}

/// Starts the query service.
///
/// Runs startup (ingest, sample, agent construction) once, then binds to
/// `[server].bind` and serves until the process is terminated. Startup
/// failures are returned before anything is bound.
pub async fn run_server(
    config: &Config,
    progress: &dyn IngestProgressReporter,
) -> anyhow::Result<()> {
    let ctx = Arc::new(AppContext::initialize(config, progress).await?);
    let app = build_router(ctx, &config.server.cors_origin)?;

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    println!("Query server listening on http://{}", bind_addr);
    println!("  POST /query  (CORS origin: {})", config.server.cors_origin);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the router over an already-initialized context.
///
/// # Errors
///
/// Returns an error if `cors_origin` is not a valid header value.
pub fn build_router(ctx: Arc<AppContext>, cors_origin: &str) -> anyhow::Result<Router> {
    let origin: HeaderValue = cors_origin
        .parse()
        .with_context(|| format!("Invalid CORS origin: {}", cors_origin))?;

    // Credentials rule out wildcards, so methods and headers are mirrored.
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request());

    Ok(Router::new()
        .route("/query", post(handle_query))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { ctx }))
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: format!("{:#}", err),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    /// Rows in the sampled table the agent answers over.
    rows: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        rows: state.ctx.table.len(),
    })
}

// ============ POST /query ============

/// Request body for `POST /query`.
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
}

/// Response body for `POST /query`.
#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub response: String,
}

/// Handler for `POST /query`.
///
/// Forwards the query verbatim to the shared agent and returns the agent's
/// primary output as text.
async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    tracing::info!(query = %req.query, "received query");

    match state.ctx.agent.invoke(&req.query).await {
        Ok(response) => Ok(Json(QueryResponse {
            response: response.output_text(),
        })),
        Err(err) => {
            tracing::error!(error = %format!("{:#}", err), "query failed");
            Err(err.into())
        }
    }
}
