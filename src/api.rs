//! REST API server for the financial coach
//!
//! Thin transport over the pipeline, the conversation orchestrator and the
//! run store. Business outcomes travel inside the response body; status
//! codes only reflect transport problems (bad request, unknown run).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::{ChatTurn, CoachServices};
use crate::capabilities::{Capabilities, CapabilityRequest};
use crate::models::FinancialInput;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub input: FinancialInput,
    #[serde(default)]
    pub capabilities: CapabilityRequest,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub services: Arc<CoachServices>,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "llm_available": state.services.credential_present,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Single Analysis Run
/// =============================

async fn run_handler(
    State(state): State<ApiState>,
    Json(req): Json<RunRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let caps = Capabilities::resolve(req.capabilities, state.services.credential_present);
    info!(
        llm = caps.llm(),
        agent = caps.agent(),
        categories = req.input.expense_categories.len(),
        "Received analysis run"
    );

    let result = state.services.pipeline.run(&req.input, &caps).await;
    (StatusCode::OK, Json(ApiResponse::success(result)))
}

/// =============================
/// Chat Endpoint
/// =============================

async fn chat_handler(
    State(state): State<ApiState>,
    Json(turn): Json<ChatTurn>,
) -> (StatusCode, Json<ApiResponse>) {
    if turn.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("message must not be empty".into())),
        );
    }

    info!(conversation_id = ?turn.conversation_id, has_input = turn.input.is_some(), "Received chat turn");

    let response = state.services.orchestrator.chat(turn).await;
    (StatusCode::OK, Json(ApiResponse::success(response)))
}

/// =============================
/// Replay Endpoint
/// =============================

async fn replay_handler(
    State(state): State<ApiState>,
    Path(run_id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    match state.services.runs.replay(&run_id).await {
        Ok(memory) => (StatusCode::OK, Json(ApiResponse::success(memory))),
        Err(e) => (StatusCode::NOT_FOUND, Json(ApiResponse::error(e.to_string()))),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(services: Arc<CoachServices>) -> Router {
    let state = ApiState { services };

    Router::new()
        .route("/health", get(health))
        .route("/agent/run", post(run_handler))
        .route("/agent/chat", post(chat_handler))
        .route("/agent/replay/:run_id", get(replay_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    services: Arc<CoachServices>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let shutdown = services.shutdown.clone();
    let router = create_router(services);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    Ok(())
}

/// Resolve on Ctrl-C, cancelling in-flight generation on the way out.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        return std::future::pending().await;
    }
    info!("Shutdown signal received");
    shutdown.cancel();
}
