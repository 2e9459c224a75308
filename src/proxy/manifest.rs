//! Manifest fetching and rewriting
//!
//! Origin manifests reference segments in whatever form the origin likes:
//! absolute URLs, root-relative paths or plain relative names. Rewriting maps
//! relative references into the proxy's `/proxy/{channel}/` namespace so that
//! segment requests come back through the cache, and optionally appends a
//! cache-busting token. Directive and comment lines pass through untouched.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::ProxyConfig;
use crate::errors::{AppError, AppResult};
use crate::models::Channel;
use crate::services::{OriginFetcher, OriginRequest};
use crate::utils::url::UrlUtils;

use super::channel_state::{ChannelRegistry, ManifestCacheEntry};
use super::liveness::LivenessTracker;

pub const MANIFEST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// File extensions treated as media segments
pub const SEGMENT_EXTENSIONS: [&str; 4] = [".ts", ".aac", ".m4s", ".mp4"];

const PROXY_PREFIX: &str = "/proxy/";

// Upper bound on manifest bodies; real playlists are a few kilobytes
const MAX_MANIFEST_BYTES: usize = 4 * 1024 * 1024;

/// Whether a manifest line references a media segment
pub fn is_segment_reference(line: &str) -> bool {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return false;
    }
    let path = UrlUtils::strip_query(line).to_ascii_lowercase();
    SEGMENT_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Inputs for a single rewrite pass
#[derive(Debug, Clone, Copy)]
pub struct RewriteContext<'a> {
    pub channel: &'a str,
    /// URL the manifest was fetched from, used to resolve root-relative lines
    pub origin_url: &'a str,
    /// Cache-busting token, `None` to leave queries alone
    pub token: Option<&'a str>,
}

/// Token for one rewrite pass: milliseconds since the Unix epoch
pub fn cache_token() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}

/// Rewrite every segment reference in `text`.
///
/// Non-segment lines are copied byte for byte, and line terminators
/// (`\n` or `\r\n`) are preserved.
pub fn rewrite_manifest(text: &str, ctx: &RewriteContext<'_>) -> String {
    let mut output = String::with_capacity(text.len() + text.len() / 4);

    for raw in text.split_inclusive('\n') {
        let (line, terminator) = split_terminator(raw);
        if is_segment_reference(line) {
            output.push_str(&rewrite_reference(line.trim(), ctx));
            output.push_str(terminator);
        } else {
            output.push_str(raw);
        }
    }

    output
}

fn split_terminator(raw: &str) -> (&str, &str) {
    if let Some(line) = raw.strip_suffix("\r\n") {
        (line, "\r\n")
    } else if let Some(line) = raw.strip_suffix('\n') {
        (line, "\n")
    } else {
        (raw, "")
    }
}

fn rewrite_reference(reference: &str, ctx: &RewriteContext<'_>) -> String {
    let target = if UrlUtils::is_absolute_http(reference) || reference.starts_with(PROXY_PREFIX) {
        reference.to_string()
    } else if reference.starts_with('/') || escapes_directory(reference) {
        match UrlUtils::join(ctx.origin_url, reference) {
            Ok(absolute) => absolute,
            Err(e) => {
                debug!("Leaving unresolvable reference '{}': {}", reference, e);
                reference.to_string()
            }
        }
    } else {
        let name = reference.trim_start_matches("./");
        format!("{PROXY_PREFIX}{}/{name}", ctx.channel)
    };

    match ctx.token {
        Some(token) => UrlUtils::with_cache_token(&target, token),
        None => target,
    }
}

/// Relative references with a `..` step leave the channel's directory and
/// are resolved against the origin instead of proxied
fn escapes_directory(reference: &str) -> bool {
    UrlUtils::strip_query(reference)
        .split('/')
        .any(|part| part == "..")
}

/// Where a served manifest came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestSource {
    Live,
    Cloud,
    /// Last good manifest, served because the origin fetch failed
    Stale,
}

#[derive(Debug, Clone)]
pub struct ManifestResponse {
    pub body: String,
    pub source: ManifestSource,
}

impl ManifestResponse {
    pub fn content_type(&self) -> &'static str {
        MANIFEST_CONTENT_TYPE
    }
}

pub struct ManifestRewriter {
    fetcher: Arc<dyn OriginFetcher>,
    tracker: Arc<LivenessTracker>,
    registry: Arc<ChannelRegistry>,
    config: ProxyConfig,
}

impl ManifestRewriter {
    pub fn new(
        fetcher: Arc<dyn OriginFetcher>,
        tracker: Arc<LivenessTracker>,
        registry: Arc<ChannelRegistry>,
        config: ProxyConfig,
    ) -> Self {
        Self {
            fetcher,
            tracker,
            registry,
            config,
        }
    }

    /// Fetch, rewrite and cache the channel's manifest, falling back to the
    /// last good copy while it is younger than `manifest_cache_ttl`.
    pub async fn get_manifest(&self, channel: &Channel) -> AppResult<ManifestResponse> {
        let is_live = self.tracker.is_live(channel).await;
        let origin_url = channel.origin_url(is_live);
        let state = self.registry.get_or_create(&channel.name);

        match self.fetch_text(origin_url).await {
            Ok(text) => {
                let token = self.config.cache_busting.then(cache_token);
                let body = rewrite_manifest(
                    &text,
                    &RewriteContext {
                        channel: &channel.name,
                        origin_url,
                        token: token.as_deref(),
                    },
                );

                state.set_manifest(ManifestCacheEntry {
                    text: body.clone(),
                    origin_url: origin_url.to_string(),
                    from_live: is_live,
                    fetched_at: Instant::now(),
                });

                Ok(ManifestResponse {
                    body,
                    source: if is_live {
                        ManifestSource::Live
                    } else {
                        ManifestSource::Cloud
                    },
                })
            }
            Err(e) => {
                if let Some(cached) = state.manifest()
                    && cached.fetched_at.elapsed() < self.config.manifest_cache_ttl
                {
                    warn!(
                        "Serving cached manifest for '{}' after fetch failure: {}",
                        channel.name, e
                    );
                    return Ok(ManifestResponse {
                        body: cached.text,
                        source: ManifestSource::Stale,
                    });
                }

                warn!("Manifest unavailable for '{}': {}", channel.name, e);
                Err(match e {
                    AppError::OriginStatus { url, status } => AppError::origin_unavailable(
                        url,
                        format!("origin returned status {status}"),
                    ),
                    other => other,
                })
            }
        }
    }

    async fn fetch_text(&self, url: &str) -> AppResult<String> {
        let safe_url = UrlUtils::obfuscate_credentials(url);
        let fetch = async {
            let response = self
                .fetcher
                .fetch(OriginRequest::new(url, self.config.manifest_timeout))
                .await?;
            if !response.is_success() {
                return Err(AppError::origin_status(
                    safe_url.clone(),
                    response.status.as_u16(),
                ));
            }
            response.into_text(url, MAX_MANIFEST_BYTES).await
        };

        tokio::time::timeout(self.config.manifest_timeout, fetch)
            .await
            .map_err(|_| AppError::origin_unavailable(safe_url.clone(), "manifest fetch timed out"))?
    }
}
