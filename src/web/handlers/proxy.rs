//! Manifest and segment handlers
//!
//! Both live under `/proxy/{channel}/`: the fixed name `playlist.m3u8` is the
//! rewritten manifest, anything else is a segment path relative to the
//! channel's origin directory.

use axum::{
    extract::{Path, RawQuery, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::proxy::segment::SegmentRequest;
use crate::web::AppState;

pub const PLAYLIST_NAME: &str = "playlist.m3u8";

pub async fn proxy_request(
    State(state): State<AppState>,
    Path((channel, path)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    if path == PLAYLIST_NAME {
        return match state.proxy.manifest(&channel).await {
            Ok(manifest) => {
                debug!("Served manifest for '{}' ({:?})", channel, manifest.source);
                manifest.into_response()
            }
            Err(e) => e.into_response(),
        };
    }

    if !is_safe_segment_path(&path) {
        return (StatusCode::BAD_REQUEST, "Invalid segment path").into_response();
    }

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let request = SegmentRequest {
        name: path,
        query,
        range,
    };

    match state.proxy.segment(&channel, request).await {
        Ok(segment) => segment.into_response(),
        Err(e) => e.into_response(),
    }
}

/// Segment paths must stay below the channel's origin directory
fn is_safe_segment_path(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && path.split('/').all(|part| !part.is_empty() && part != "." && part != "..")
}
