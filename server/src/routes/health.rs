//! Health check endpoint

use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::SharedState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    pub num_classes: Option<usize>,
    pub version: String,
    pub uptime_seconds: u64,
}

/// GET /health - Health check endpoint
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    let num_classes = state.num_classes();
    Json(HealthResponse {
        status: "ok".to_string(),
        model_loaded: num_classes.is_some(),
        num_classes,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
    })
}
