use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use orchestrator_shared::errors::StorageError;
use orchestrator_shared::scenario::{HealthResponse, PoolStatusResponse, ScenarioRecord};

use crate::scenario::{ScenarioPool, ScenarioRepository};

/// Shared state of the control surface handlers
#[derive(Clone)]
pub struct ControlState {
    pub pool: ScenarioPool,
    pub repository: Arc<dyn ScenarioRepository>,
    /// Cancelled to request a graceful process shutdown
    pub shutdown: CancellationToken,
}

/// Error type for control handlers, rendered as `{error, code}` JSON
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Scenario '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ControlError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ControlError::Storage(StorageError::InvalidKey { .. }) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST")
            }
            ControlError::Storage(err) => {
                tracing::error!(error = %err, "Scenario lookup failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR")
            }
        };

        let body = json!({
            "error": self.to_string(),
            "code": code,
        });
        (status, Json(body)).into_response()
    }
}

async fn health(State(state): State<ControlState>) -> Json<HealthResponse> {
    let status = if state.shutdown.is_cancelled() || state.pool.is_shutting_down() {
        "shutting_down"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn pool_status(State(state): State<ControlState>) -> Json<PoolStatusResponse> {
    Json(state.pool.status())
}

async fn scenario_status(
    State(state): State<ControlState>,
    Path(scenario_id): Path<String>,
) -> Result<Json<ScenarioRecord>, ControlError> {
    state
        .repository
        .load_scenario(&scenario_id)
        .await?
        .map(Json)
        .ok_or(ControlError::NotFound(scenario_id))
}

async fn request_shutdown(State(state): State<ControlState>) -> impl IntoResponse {
    info!("Graceful shutdown requested through the control surface");
    state.shutdown.cancel();
    (
        StatusCode::ACCEPTED,
        Json(json!({ "status": "shutting_down" })),
    )
}

pub fn router(state: ControlState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/pool", get(pool_status))
        .route("/scenarios/{id}", get(scenario_status))
        .route("/shutdown", post(request_shutdown))
        .with_state(state)
}
