use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use tracing::warn;

use crate::app::AppState;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    status: &'static str,
}

pub async fn health_check() -> Json<HealthStatus> {
    Json(HealthStatus { status: "ok" })
}

/// Current directory and connection counts.
pub async fn relay_stats(State(state): State<AppState>) -> impl IntoResponse {
    match state.relay.stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(err) => {
            warn!(error = %err, "stats requested after relay stopped");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}
