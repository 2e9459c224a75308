//! Segment serving
//!
//! A cache hit is answered from memory without touching the network. A miss
//! streams the segment from the selected origin while a copy is accumulated
//! for the cache; the copy is committed only when the body completes cleanly
//! and stayed under the per-segment ceiling. Either way the preloader is
//! kicked afterwards so the following segments are warm.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::http::StatusCode;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::config::ProxyConfig;
use crate::errors::{AppError, AppResult};
use crate::models::Channel;
use crate::services::{ByteStream, OriginFetcher, OriginRequest};
use crate::utils::url::{CACHE_TOKEN_PARAM, UrlUtils};

use super::channel_state::{ChannelRegistry, ChannelState};
use super::liveness::LivenessTracker;
use super::preloader::Preloader;

/// Content type for a segment, chosen by file extension
pub fn segment_content_type(name: &str) -> &'static str {
    let path = UrlUtils::strip_query(name).to_ascii_lowercase();
    match path.rsplit_once('.').map(|(_, ext)| ext) {
        Some("ts") => "video/mp2t",
        Some("aac") => "audio/aac",
        Some("m4s") => "video/iso.segment",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

/// Outcome of matching a `Range` header against a body of known length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// No usable range; serve the whole body
    Full,
    /// Inclusive byte offsets
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

/// Resolve a single `bytes=` range. Multi-range and malformed headers fall
/// back to the full body.
pub fn parse_byte_range(header: &str, len: u64) -> ByteRange {
    let Some(spec) = header.trim().strip_prefix("bytes=") else {
        return ByteRange::Full;
    };
    if spec.contains(',') {
        return ByteRange::Full;
    }
    let Some((start, end)) = spec.trim().split_once('-') else {
        return ByteRange::Full;
    };

    let (start, end) = match (start.trim(), end.trim()) {
        ("", "") => return ByteRange::Full,
        ("", suffix) => {
            let Ok(suffix) = suffix.parse::<u64>() else {
                return ByteRange::Full;
            };
            if suffix == 0 || len == 0 {
                return ByteRange::Unsatisfiable;
            }
            (len.saturating_sub(suffix), len - 1)
        }
        (start, end) => {
            let Ok(start) = start.parse::<u64>() else {
                return ByteRange::Full;
            };
            let end = if end.is_empty() {
                len.saturating_sub(1)
            } else {
                match end.parse::<u64>() {
                    Ok(end) => end.min(len.saturating_sub(1)),
                    Err(_) => return ByteRange::Full,
                }
            };
            if start >= len || start > end {
                return ByteRange::Unsatisfiable;
            }
            (start, end)
        }
    };

    ByteRange::Partial { start, end }
}

/// Client request for one segment
#[derive(Debug, Clone, Default)]
pub struct SegmentRequest {
    /// Path below `/proxy/{channel}/`, also the cache key
    pub name: String,
    pub query: Option<String>,
    pub range: Option<String>,
}

pub enum SegmentBody {
    Full(Bytes),
    Stream(ByteStream),
}

pub struct SegmentResponse {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub content_length: Option<u64>,
    pub content_range: Option<String>,
    pub from_cache: bool,
    pub body: SegmentBody,
}

impl std::fmt::Debug for SegmentResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .field("content_range", &self.content_range)
            .field("from_cache", &self.from_cache)
            .finish_non_exhaustive()
    }
}

pub struct SegmentServer {
    fetcher: Arc<dyn OriginFetcher>,
    tracker: Arc<LivenessTracker>,
    registry: Arc<ChannelRegistry>,
    preloader: Arc<Preloader>,
    config: ProxyConfig,
}

impl SegmentServer {
    pub fn new(
        fetcher: Arc<dyn OriginFetcher>,
        tracker: Arc<LivenessTracker>,
        registry: Arc<ChannelRegistry>,
        preloader: Arc<Preloader>,
        config: ProxyConfig,
    ) -> Self {
        Self {
            fetcher,
            tracker,
            registry,
            preloader,
            config,
        }
    }

    pub async fn serve(
        &self,
        channel: Arc<Channel>,
        request: SegmentRequest,
    ) -> AppResult<SegmentResponse> {
        let state = self.registry.get_or_create(&channel.name);

        if let Some(bytes) = state.segments.get(&request.name) {
            debug!("Cache hit: {}/{}", channel.name, request.name);
            self.preload_in_background(channel, request.name.clone());
            return Ok(cached_response(&request, bytes));
        }

        debug!("Cache miss: {}/{}", channel.name, request.name);
        self.fetch_from_origin(channel, state, request).await
    }

    fn preload_in_background(&self, channel: Arc<Channel>, served: String) {
        if self.config.preload_segments == 0 {
            return;
        }
        let tracker = self.tracker.clone();
        let preloader = self.preloader.clone();
        tokio::spawn(async move {
            let is_live = tracker.is_live(&channel).await;
            match UrlUtils::base_directory(channel.origin_url(is_live)) {
                Ok(base_dir) => {
                    preloader.schedule(&channel.name, &base_dir, &served);
                }
                Err(e) => debug!("No base directory for '{}': {}", channel.name, e),
            }
        });
    }

    async fn fetch_from_origin(
        &self,
        channel: Arc<Channel>,
        state: Arc<ChannelState>,
        request: SegmentRequest,
    ) -> AppResult<SegmentResponse> {
        let is_live = self.tracker.is_live(&channel).await;
        let origin_url = channel.origin_url(is_live);
        let base_dir = UrlUtils::base_directory(origin_url).map_err(|e| {
            AppError::internal(format!(
                "invalid origin URL for channel '{}': {e}",
                channel.name
            ))
        })?;
        let mut url = UrlUtils::join(&base_dir, &request.name).map_err(|e| {
            AppError::internal(format!("invalid segment path '{}': {e}", request.name))
        })?;
        if let Some(query) = request.query.as_deref().and_then(origin_query) {
            url = format!("{url}?{query}");
        }

        let response = self
            .fetcher
            .fetch(
                OriginRequest::new(url.as_str(), self.config.fetch_timeout)
                    .with_range(request.range.clone()),
            )
            .await
            .inspect_err(|e| warn!("Segment fetch failed for '{}': {}", channel.name, e))?;

        if !response.is_success() {
            warn!(
                "Origin returned {} for {}",
                response.status,
                UrlUtils::obfuscate_credentials(&url)
            );
            return Err(AppError::origin_status(
                UrlUtils::obfuscate_credentials(&url),
                response.status.as_u16(),
            ));
        }

        let max_bytes = self.config.max_bytes_per_segment;
        let cacheable = response.status == StatusCode::OK
            && request.range.is_none()
            && response.content_length.is_none_or(|len| len <= max_bytes as u64);

        let preloader = self.preloader.clone();
        let channel_name = channel.name.clone();
        let name = request.name.clone();
        let on_complete = move |accumulated: Option<Bytes>| {
            if let Some(bytes) = accumulated.filter(|bytes| !bytes.is_empty()) {
                match state.segments.put(&name, bytes) {
                    Ok(()) => debug!("Cached {}/{}", channel_name, name),
                    Err(e) => debug!("Not caching {}/{}: {}", channel_name, name, e),
                }
            }
            preloader.schedule(&channel_name, &base_dir, &name);
        };

        let body = CachingStream::new(
            response.body,
            cacheable.then(BytesMut::new),
            max_bytes,
            response.content_length,
            Box::new(on_complete),
        );

        Ok(SegmentResponse {
            status: response.status,
            content_type: segment_content_type(&request.name),
            content_length: response.content_length,
            content_range: response.content_range,
            from_cache: false,
            body: SegmentBody::Stream(body.boxed()),
        })
    }
}

fn cached_response(request: &SegmentRequest, bytes: Bytes) -> SegmentResponse {
    let len = bytes.len() as u64;
    let content_type = segment_content_type(&request.name);
    let range = request
        .range
        .as_deref()
        .map_or(ByteRange::Full, |r| parse_byte_range(r, len));

    match range {
        ByteRange::Full => SegmentResponse {
            status: StatusCode::OK,
            content_type,
            content_length: Some(len),
            content_range: None,
            from_cache: true,
            body: SegmentBody::Full(bytes),
        },
        ByteRange::Partial { start, end } => SegmentResponse {
            status: StatusCode::PARTIAL_CONTENT,
            content_type,
            content_length: Some(end - start + 1),
            content_range: Some(format!("bytes {start}-{end}/{len}")),
            from_cache: true,
            body: SegmentBody::Full(bytes.slice(start as usize..=end as usize)),
        },
        ByteRange::Unsatisfiable => SegmentResponse {
            status: StatusCode::RANGE_NOT_SATISFIABLE,
            content_type,
            content_length: Some(0),
            content_range: Some(format!("bytes */{len}")),
            from_cache: true,
            body: SegmentBody::Full(Bytes::new()),
        },
    }
}

/// Client query with our cache-busting parameter removed
fn origin_query(query: &str) -> Option<String> {
    let kept: Vec<&str> = query
        .split('&')
        .filter(|p| !p.is_empty())
        .filter(|p| p.split('=').next() != Some(CACHE_TOKEN_PARAM))
        .collect();
    (!kept.is_empty()).then(|| kept.join("&"))
}

type CompletionHook = Box<dyn FnOnce(Option<Bytes>) + Send>;

/// Forwards an origin body while keeping a bounded copy of it.
///
/// The copy is dropped as soon as it would exceed the ceiling. The hook runs
/// once the origin body is complete: on the chunk that reaches the declared
/// length, or at end of stream for bodies without one. An error or an early
/// drop by the client discards everything.
struct CachingStream {
    inner: ByteStream,
    buffer: Option<BytesMut>,
    max_bytes: usize,
    expected_len: Option<u64>,
    received: u64,
    on_complete: Option<CompletionHook>,
}

impl CachingStream {
    fn new(
        inner: ByteStream,
        buffer: Option<BytesMut>,
        max_bytes: usize,
        expected_len: Option<u64>,
        on_complete: CompletionHook,
    ) -> Self {
        Self {
            inner,
            buffer,
            max_bytes,
            expected_len,
            received: 0,
            on_complete: Some(on_complete),
        }
    }

    fn complete(&mut self) {
        if let Some(hook) = self.on_complete.take() {
            hook(self.buffer.take().map(BytesMut::freeze));
        }
    }
}

impl Stream for CachingStream {
    type Item = AppResult<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                let overflow = this
                    .buffer
                    .as_ref()
                    .is_some_and(|buf| buf.len() + chunk.len() > this.max_bytes);
                if overflow {
                    debug!("Segment exceeds {} bytes, streaming without caching", this.max_bytes);
                    this.buffer = None;
                } else if let Some(buf) = this.buffer.as_mut() {
                    buf.extend_from_slice(&chunk);
                }

                // Hyper stops polling once Content-Length bytes are written
                this.received += chunk.len() as u64;
                if this.expected_len.is_some_and(|len| this.received >= len) {
                    this.complete();
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.buffer = None;
                this.on_complete = None;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.complete();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
