//! Outbound HTTP access to channel origins
//!
//! Every upstream request the proxy makes (liveness probes, manifest fetches,
//! segment fetches and preloads) goes through an [`OriginFetcher`]. The
//! reqwest-backed implementation applies a per-request deadline and an
//! optional global concurrency ceiling shared by foreground and preload work.
//!
//! Key behaviors:
//!   - The deadline covers waiting for a concurrency permit, connecting,
//!     receiving headers and reading the body.
//!   - Non-success statuses are returned, not raised, so segment serving can
//!     propagate them verbatim.
//!   - Network errors and expired deadlines both surface as
//!     `AppError::OriginUnavailable`; nothing here retries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, header};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::ProxyConfig;
use crate::errors::{AppError, AppResult};
use crate::utils::url::UrlUtils;

/// Body of an origin response, yielded chunk by chunk
pub type ByteStream = BoxStream<'static, AppResult<Bytes>>;

/// A single outbound GET
#[derive(Debug, Clone)]
pub struct OriginRequest {
    pub url: String,
    /// Raw `Range` header value to forward upstream
    pub range: Option<String>,
    pub timeout: Duration,
}

impl OriginRequest {
    pub fn new<S: Into<String>>(url: S, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            range: None,
            timeout,
        }
    }

    pub fn with_range<S: Into<String>>(mut self, range: Option<S>) -> Self {
        self.range = range.map(Into::into).filter(|r: &String| !r.trim().is_empty());
        self
    }
}

/// Upstream response with a streaming body
pub struct OriginResponse {
    pub status: StatusCode,
    pub content_length: Option<u64>,
    pub content_range: Option<String>,
    pub body: ByteStream,
}

impl std::fmt::Debug for OriginResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OriginResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("content_range", &self.content_range)
            .finish_non_exhaustive()
    }
}

impl OriginResponse {
    /// Response with a body that is already fully in memory
    pub fn from_bytes(status: StatusCode, body: Bytes) -> Self {
        let len = body.len() as u64;
        Self {
            status,
            content_length: Some(len),
            content_range: None,
            body: futures::stream::once(async move { Ok(body) }).boxed(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Collect the whole body, giving up as soon as it exceeds `max` bytes.
    pub async fn into_bytes_limited(self, max: usize) -> AppResult<Bytes> {
        if let Some(len) = self.content_length
            && len > max as u64
        {
            return Err(AppError::PayloadTooLarge {
                size: len as usize,
                max,
            });
        }

        let mut body = self.body;
        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.try_next().await? {
            if buffer.len() + chunk.len() > max {
                return Err(AppError::PayloadTooLarge {
                    size: buffer.len() + chunk.len(),
                    max,
                });
            }
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer.freeze())
    }

    /// Read at most `limit` leading bytes and drop the rest of the body.
    pub async fn read_prefix(self, limit: usize) -> AppResult<Bytes> {
        let mut body = self.body;
        let mut buffer = BytesMut::with_capacity(limit);
        while buffer.len() < limit {
            match body.try_next().await? {
                Some(chunk) => buffer.extend_from_slice(&chunk),
                None => break,
            }
        }
        buffer.truncate(limit);
        Ok(buffer.freeze())
    }

    /// Collect the body as UTF-8 text
    pub async fn into_text(self, url: &str, max: usize) -> AppResult<String> {
        let bytes = self.into_bytes_limited(max).await.map_err(|e| match e {
            AppError::PayloadTooLarge { size, .. } => AppError::origin_unavailable(
                UrlUtils::obfuscate_credentials(url),
                format!("body too large ({size} bytes)"),
            ),
            other => other,
        })?;
        String::from_utf8(bytes.to_vec()).map_err(|e| {
            AppError::origin_unavailable(
                UrlUtils::obfuscate_credentials(url),
                format!("body is not valid UTF-8: {e}"),
            )
        })
    }
}

/// The sole point of contact with upstream servers
#[async_trait]
pub trait OriginFetcher: Send + Sync {
    /// Issue a GET. Non-success statuses are returned as responses; only
    /// network failures and expired deadlines are errors.
    async fn fetch(&self, request: OriginRequest) -> AppResult<OriginResponse>;
}

/// reqwest-backed fetcher with per-request deadlines and a global ceiling
pub struct HttpOriginFetcher {
    client: Client,
    limiter: Option<Arc<Semaphore>>,
}

impl HttpOriginFetcher {
    pub fn new(config: &ProxyConfig) -> AppResult<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .pool_max_idle_per_host(8)
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            limiter: config
                .origin_concurrency_limit()
                .map(|limit| Arc::new(Semaphore::new(limit))),
        })
    }

    /// Permits currently free under the global ceiling, `None` when unlimited
    pub fn available_permits(&self) -> Option<usize> {
        self.limiter.as_ref().map(|s| s.available_permits())
    }
}

#[async_trait]
impl OriginFetcher for HttpOriginFetcher {
    async fn fetch(&self, request: OriginRequest) -> AppResult<OriginResponse> {
        let safe_url = UrlUtils::obfuscate_credentials(&request.url);
        let deadline = Instant::now() + request.timeout;

        let permit = match &self.limiter {
            Some(limiter) => {
                let acquire = limiter.clone().acquire_owned();
                match tokio::time::timeout_at(deadline, acquire).await {
                    Ok(Ok(permit)) => Some(permit),
                    Ok(Err(_)) => {
                        return Err(AppError::internal("origin concurrency limiter closed"));
                    }
                    Err(_) => {
                        warn!("Timed out waiting for an origin slot: {}", safe_url);
                        return Err(AppError::origin_unavailable(
                            safe_url,
                            "timed out waiting for an origin request slot",
                        ));
                    }
                }
            }
            None => None,
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        let mut builder = self.client.get(&request.url).timeout(remaining);
        if let Some(range) = &request.range {
            builder = builder.header(header::RANGE, range);
        }

        let response = builder.send().await.map_err(|e| {
            let reason = describe_reqwest_error(&e);
            debug!("Origin request failed for {}: {}", safe_url, reason);
            AppError::origin_unavailable(safe_url.clone(), reason)
        })?;

        let status =
            StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        let content_length = response.content_length();
        let content_range = response
            .headers()
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body_url = safe_url.clone();
        let body = response
            .bytes_stream()
            .map(move |chunk| {
                // The permit lives as long as the body is being read
                let _held = &permit;
                chunk.map_err(|e| {
                    AppError::origin_unavailable(body_url.clone(), describe_reqwest_error(&e))
                })
            })
            .boxed();

        debug!(
            "Origin responded {} for {} (content-length: {:?})",
            status, safe_url, content_length
        );

        Ok(OriginResponse {
            status,
            content_length,
            content_range,
            body,
        })
    }
}

fn describe_reqwest_error(error: &reqwest::Error) -> String {
    let kind = if error.is_timeout() {
        "timed out"
    } else if error.is_connect() {
        "connection failed"
    } else if error.is_body() || error.is_decode() {
        "body read failed"
    } else {
        "request failed"
    };
    UrlUtils::obfuscate_credentials(&format!("{kind}: {error}"))
}
