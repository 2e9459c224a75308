//! Health check handler

use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;

use crate::web::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub channels: usize,
}

/// Liveness of the proxy process itself; origins are not contacted
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        channels: state.proxy.store().snapshot().len(),
    })
}
