//! Centralized error handling for the HLS proxy
//!
//! Every failure the proxy core can observe is classified into one of a
//! handful of categories so the web layer can map it to a status code
//! without inspecting messages.
//!
//! # Error Categories
//!
//! - **Origin errors**: network failures, timeouts and non-success statuses
//!   from upstream servers
//! - **Channel errors**: unknown channel keys
//! - **Cache signals**: payloads too large to cache (never surfaced)
//! - **Configuration errors**: malformed channel entries or settings
//!
//! # Usage
//!
//! ```rust
//! use hls_proxy::errors::{AppError, AppResult};
//!
//! fn lookup(known: bool) -> AppResult<()> {
//!     if known {
//!         Ok(())
//!     } else {
//!         Err(AppError::channel_not_found("news"))
//!     }
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;
