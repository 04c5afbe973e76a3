//! HTTP request handlers.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::state::{AppState, StartRun};
use crate::error::ViewsError;
use crate::oracle::OracleRequest;

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors_enabled = state.config.cors_enabled;
    let logging = state.config.logging;
    let body_limit = state.config.max_body_size;

    let mut router = Router::new()
        // Health and status
        .route("/health", get(health_check))
        .route("/status", get(status))
        // Run control
        .route("/runs", post(start_run).get(list_runs))
        .route("/runs/:id", get(get_stats).delete(cancel_run))
        .route("/runs/:id/report", get(get_report))
        .route("/runs/:id/events", get(get_events))
        // Oracle passthrough
        .route("/decide-engagement", post(decide_engagement))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state);

    if cors_enabled {
        router = router.layer(CorsLayer::permissive());
    }
    if logging {
        router = router.layer(TraceLayer::new_for_http());
    }
    router
}

/// Map an error to a status code and JSON body
fn error_response(err: &ViewsError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match err {
        ViewsError::InvalidInput(_) | ViewsError::Json(_) => StatusCode::BAD_REQUEST,
        ViewsError::RunNotFound(_) => StatusCode::NOT_FOUND,
        ViewsError::Oracle(_) => StatusCode::BAD_GATEWAY,
        ViewsError::Server(_) | ViewsError::Config(_) | ViewsError::Io(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        },
    };
    (status, Json(json!({"error": err.to_string()})))
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    /// Always "ok"
    pub status: &'static str,
    /// Crate version
    pub version: &'static str,
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Status response
#[derive(Serialize)]
pub struct StatusResponse {
    /// Always "ok"
    pub status: &'static str,
    /// Crate version
    pub version: &'static str,
    /// Seconds since start
    pub uptime_secs: u64,
    /// Oracle serving verdicts
    pub oracle: String,
    /// Tracked runs
    pub runs: usize,
    /// Runs still stepping
    pub running: usize,
}

/// Status endpoint
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(StatusResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.uptime().as_secs(),
        oracle: state.oracle.name().to_string(),
        runs: state.runs.count().await,
        running: state.runs.running().await,
    })
}

/// Start a run
async fn start_run(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartRun>,
) -> impl IntoResponse {
    match state.start_run(req).await {
        Ok(record) => {
            tracing::info!(run = %record.run_id, seed = %record.report.seed, "Run started");
            (
                StatusCode::CREATED,
                Json(json!({
                    "run_id": record.run_id,
                    "seed": record.report.seed,
                    "stats": record.report.stats,
                })),
            )
        },
        Err(e) => error_response(&e),
    }
}

/// List run ids
async fn list_runs(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({"runs": state.runs.list_ids().await}))
}

/// Stats of a run
async fn get_stats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.runs.stats(&id).await {
        Ok(stats) => (StatusCode::OK, Json(json!(stats))),
        Err(e) => error_response(&e),
    }
}

/// Full report of a run
async fn get_report(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.runs.get(&id).await {
        Ok(record) => (StatusCode::OK, Json(json!(record))),
        Err(e) => error_response(&e),
    }
}

/// Transmission log of a run
async fn get_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.runs.events(&id).await {
        Ok(events) => (
            StatusCode::OK,
            Json(json!({"run_id": id, "events": events})),
        ),
        Err(e) => error_response(&e),
    }
}

/// Query of a cancel request
#[derive(Debug, Default, Deserialize)]
pub struct CancelQuery {
    /// Also forget the run once it has stopped
    #[serde(default)]
    pub purge: bool,
}

/// Cancel a run and return its final report; `?purge=true` also drops it
async fn cancel_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<CancelQuery>,
) -> impl IntoResponse {
    match state.runs.cancel(&id).await {
        Ok(record) => {
            if query.purge {
                state.runs.remove(&id).await;
                tracing::info!(run = %id, "Run purged");
            }
            (StatusCode::OK, Json(json!(record)))
        },
        Err(e) => error_response(&e),
    }
}

/// Ask the configured oracle for one verdict
async fn decide_engagement(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OracleRequest>,
) -> impl IntoResponse {
    match state.oracle.decide(&req).await {
        Ok(verdict) => (
            StatusCode::OK,
            Json(json!({
                "persona_id": req.persona_id,
                "engage": verdict.engage,
                "reason": verdict.reason,
                "priority": verdict.priority,
            })),
        ),
        Err(e) => error_response(&ViewsError::from(e)),
    }
}
