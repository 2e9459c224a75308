//! HTTP response mapping
//!
//! Converts proxy results into axum responses. Playback clients only ever
//! see plain-text diagnostics or bare status codes, never JSON error bodies.

use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::errors::AppError;
use crate::proxy::manifest::ManifestResponse;
use crate::proxy::segment::{SegmentBody, SegmentResponse};

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::ChannelNotFound { channel } => (
                StatusCode::NOT_FOUND,
                format!("Channel not found: {channel}"),
            )
                .into_response(),
            AppError::OriginUnavailable { .. } => {
                (StatusCode::BAD_GATEWAY, self.to_string()).into_response()
            }
            AppError::OriginStatus { status, .. } => StatusCode::from_u16(*status)
                .unwrap_or(StatusCode::BAD_GATEWAY)
                .into_response(),
            AppError::PayloadTooLarge { .. }
            | AppError::ConfigInvalid { .. }
            | AppError::Io(_)
            | AppError::Internal { .. } => {
                error!("Request failed: {}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}

impl IntoResponse for ManifestResponse {
    fn into_response(self) -> Response {
        (
            [
                (header::CONTENT_TYPE, self.content_type()),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            self.body,
        )
            .into_response()
    }
}

impl IntoResponse for SegmentResponse {
    fn into_response(self) -> Response {
        let body = match self.body {
            SegmentBody::Full(bytes) => Body::from(bytes),
            SegmentBody::Stream(stream) => Body::from_stream(stream),
        };

        let mut response = Response::new(body);
        *response.status_mut() = self.status;

        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(self.content_type),
        );
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        if let Some(len) = self.content_length {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
        }
        if let Some(range) = self
            .content_range
            .as_deref()
            .and_then(|r| HeaderValue::from_str(r).ok())
        {
            headers.insert(header::CONTENT_RANGE, range);
        }

        response
    }
}
