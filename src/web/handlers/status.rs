//! Per-channel status handler

use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Response},
};

use crate::web::AppState;

/// Report liveness, cache occupancy and manifest state for a channel
pub async fn channel_status(
    State(state): State<AppState>,
    Path(channel): Path<String>,
) -> Response {
    match state.proxy.status(&channel) {
        Ok(status) => Json(status).into_response(),
        Err(e) => e.into_response(),
    }
}
