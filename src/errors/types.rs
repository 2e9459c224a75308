//! Error type definitions for the HLS proxy

use thiserror::Error;

/// Top-level application error type
///
/// Liveness-probe and preload failures are absorbed where they happen and
/// never travel as far as a client; everything else maps to an HTTP status
/// in `web::responses`.
#[derive(Error, Debug)]
pub enum AppError {
    /// Network error or deadline exceeded while talking to an origin
    #[error("Origin unavailable: {url} - {reason}")]
    OriginUnavailable { url: String, reason: String },

    /// The origin answered, but not with a success status
    #[error("Origin returned status {status} for {url}")]
    OriginStatus { url: String, status: u16 },

    /// Unknown channel key
    #[error("Channel not found: {channel}")]
    ChannelNotFound { channel: String },

    /// Internal signal: a body exceeded the per-segment cache ceiling
    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Malformed channel entry or setting
    #[error("Configuration error: {message}")]
    ConfigInvalid { message: String },

    /// Filesystem errors from the channel store
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Convenience methods for creating common error types
impl AppError {
    pub fn origin_unavailable<U: Into<String>, R: Into<String>>(url: U, reason: R) -> Self {
        Self::OriginUnavailable {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn origin_status<U: Into<String>>(url: U, status: u16) -> Self {
        Self::OriginStatus {
            url: url.into(),
            status,
        }
    }

    pub fn channel_not_found<S: Into<String>>(channel: S) -> Self {
        Self::ChannelNotFound {
            channel: channel.into(),
        }
    }

    pub fn config_invalid<S: Into<String>>(message: S) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error means the upstream could not serve the request,
    /// either by failing outright or by answering with an error status
    pub fn is_origin_failure(&self) -> bool {
        matches!(
            self,
            Self::OriginUnavailable { .. } | Self::OriginStatus { .. }
        )
    }
}
