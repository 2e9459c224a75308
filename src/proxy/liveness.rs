//! Live-origin detection
//!
//! A channel is live when a short probe of its live manifest returns a
//! success status and a body that looks like a playlist with segments.
//! Verdicts are cached per channel for `liveness_ttl`; within that window no
//! network call is made. Probe failures of any kind mean "not live" and are
//! never surfaced to clients.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::ProxyConfig;
use crate::models::Channel;
use crate::services::{OriginFetcher, OriginRequest};
use crate::utils::url::UrlUtils;

use super::channel_state::ChannelRegistry;

/// Decides whether a probed manifest prefix indicates a live origin
pub trait ProbePolicy: Send + Sync {
    fn is_live(&self, prefix: &[u8]) -> bool;
}

/// Live when the prefix mentions a `.ts` segment
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentTokenPolicy;

impl ProbePolicy for SegmentTokenPolicy {
    fn is_live(&self, prefix: &[u8]) -> bool {
        prefix.windows(3).any(|w| w == b".ts")
    }
}

pub struct LivenessTracker {
    fetcher: Arc<dyn OriginFetcher>,
    registry: Arc<ChannelRegistry>,
    policy: Box<dyn ProbePolicy>,
    config: ProxyConfig,
}

impl LivenessTracker {
    pub fn new(
        fetcher: Arc<dyn OriginFetcher>,
        registry: Arc<ChannelRegistry>,
        config: ProxyConfig,
    ) -> Self {
        Self::with_policy(fetcher, registry, config, Box::new(SegmentTokenPolicy))
    }

    pub fn with_policy(
        fetcher: Arc<dyn OriginFetcher>,
        registry: Arc<ChannelRegistry>,
        config: ProxyConfig,
        policy: Box<dyn ProbePolicy>,
    ) -> Self {
        Self {
            fetcher,
            registry,
            policy,
            config,
        }
    }

    /// Current verdict, probing the live origin if the cached one is stale
    pub async fn is_live(&self, channel: &Channel) -> bool {
        let state = self.registry.get_or_create(&channel.name);
        let record = state.liveness();
        if let Some(checked_at) = record.checked_at
            && checked_at.elapsed() < self.config.liveness_ttl
        {
            return record.is_live;
        }

        let is_live = match channel.live_url() {
            Some(url) => self.probe(url).await,
            None => false,
        };

        let previous = state.set_liveness(is_live, Instant::now());
        if previous.checked_at.is_some() && previous.is_live != is_live {
            info!(
                "Channel '{}' switched to {} origin",
                channel.name,
                if is_live { "live" } else { "cloud" }
            );
        } else {
            debug!("Channel '{}' liveness: {}", channel.name, is_live);
        }
        is_live
    }

    /// Last recorded verdict without probing
    pub fn peek(&self, channel: &str) -> Option<bool> {
        let record = self.registry.get(channel)?.liveness();
        record.checked_at.map(|_| record.is_live)
    }

    async fn probe(&self, url: &str) -> bool {
        let request = OriginRequest::new(url, self.config.probe_timeout)
            .with_range(Some(format!("bytes=0-{}", self.config.probe_bytes)));

        let response = match self.fetcher.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!("Liveness probe failed: {}", e);
                return false;
            }
        };

        if !response.is_success() {
            debug!(
                "Liveness probe of {} returned {}",
                UrlUtils::obfuscate_credentials(url),
                response.status
            );
            return false;
        }

        // Origins that ignore Range still only get `probe_bytes + 1` bytes read
        let deadline = Instant::now() + self.config.probe_timeout;
        match tokio::time::timeout_at(deadline, response.read_prefix(self.config.probe_bytes + 1))
            .await
        {
            Ok(Ok(prefix)) => self.policy.is_live(&prefix),
            Ok(Err(e)) => {
                debug!("Liveness probe body failed: {}", e);
                false
            }
            Err(_) => {
                debug!(
                    "Liveness probe body timed out for {}",
                    UrlUtils::obfuscate_credentials(url)
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{AppError, AppResult};
    use crate::models::ChannelEntry;
    use crate::proxy::segment_cache::SegmentCacheLimits;
    use crate::services::OriginResponse;
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use bytes::Bytes;
    use std::num::NonZeroUsize;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    enum Reply {
        Body(&'static str),
        Status(StatusCode),
        Fail,
    }

    struct ScriptedFetcher {
        reply: Mutex<Reply>,
        calls: AtomicUsize,
        last_range: Mutex<Option<String>>,
    }

    impl ScriptedFetcher {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                reply: Mutex::new(reply),
                calls: AtomicUsize::new(0),
                last_range: Mutex::new(None),
            })
        }

        fn set(&self, reply: Reply) {
            *self.reply.lock().unwrap() = reply;
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl OriginFetcher for ScriptedFetcher {
        async fn fetch(&self, request: OriginRequest) -> AppResult<OriginResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_range.lock().unwrap() = request.range.clone();
            match &*self.reply.lock().unwrap() {
                Reply::Body(body) => Ok(OriginResponse::from_bytes(
                    StatusCode::OK,
                    Bytes::from_static(body.as_bytes()),
                )),
                Reply::Status(status) => Ok(OriginResponse::from_bytes(*status, Bytes::new())),
                Reply::Fail => Err(AppError::origin_unavailable(request.url, "refused")),
            }
        }
    }

    fn tracker(fetcher: Arc<ScriptedFetcher>) -> LivenessTracker {
        let registry = Arc::new(ChannelRegistry::new(SegmentCacheLimits {
            ttl: Duration::from_secs(30),
            max_segments: NonZeroUsize::new(4).unwrap(),
            max_bytes_per_segment: 1024,
        }));
        LivenessTracker::new(fetcher, registry, ProxyConfig::default())
    }

    fn channel(live: Option<&str>) -> Channel {
        Channel::from_entry(
            "a",
            &ChannelEntry {
                live: live.map(str::to_string),
                cloud: Some("http://o/cloud.m3u8".to_string()),
            },
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_when_prefix_mentions_segment() {
        let fetcher = ScriptedFetcher::new(Reply::Body("#EXTM3U\n#EXTINF:6,\nseg1.ts\n"));
        let tracker = tracker(fetcher.clone());

        assert!(tracker.is_live(&channel(Some("http://o/live.m3u8"))).await);
        assert_eq!(
            fetcher.last_range.lock().unwrap().as_deref(),
            Some("bytes=0-200")
        );
        assert_eq!(tracker.peek("a"), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_live_on_failure_or_bad_status_or_empty_playlist() {
        let fetcher = ScriptedFetcher::new(Reply::Fail);
        let tracker = tracker(fetcher.clone());
        let channel = channel(Some("http://o/live.m3u8"));
        assert!(!tracker.is_live(&channel).await);

        tokio::time::advance(Duration::from_secs(6)).await;
        fetcher.set(Reply::Status(StatusCode::NOT_FOUND));
        assert!(!tracker.is_live(&channel).await);

        tokio::time::advance(Duration::from_secs(6)).await;
        fetcher.set(Reply::Body("#EXTM3U\n#EXT-X-ENDLIST\n"));
        assert!(!tracker.is_live(&channel).await);
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_verdict_is_cached_within_ttl() {
        let fetcher = ScriptedFetcher::new(Reply::Body("seg1.ts"));
        let tracker = tracker(fetcher.clone());
        let channel = channel(Some("http://o/live.m3u8"));

        assert!(tracker.is_live(&channel).await);
        fetcher.set(Reply::Fail);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(tracker.is_live(&channel).await);
        assert_eq!(fetcher.calls(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!tracker.is_live(&channel).await);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    #[tracing_test::traced_test]
    async fn test_origin_switch_is_logged() {
        let fetcher = ScriptedFetcher::new(Reply::Body("seg1.ts"));
        let tracker = tracker(fetcher.clone());
        let channel = channel(Some("http://o/live.m3u8"));

        assert!(tracker.is_live(&channel).await);
        assert!(!logs_contain("switched to"));

        fetcher.set(Reply::Fail);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!tracker.is_live(&channel).await);
        assert!(logs_contain("Channel 'a' switched to cloud origin"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_without_live_url_is_never_probed() {
        let fetcher = ScriptedFetcher::new(Reply::Body("seg1.ts"));
        let tracker = tracker(fetcher.clone());

        assert!(!tracker.is_live(&channel(None)).await);
        assert_eq!(fetcher.calls(), 0);
    }

    #[test]
    fn test_peek_before_first_probe_is_none() {
        let fetcher = ScriptedFetcher::new(Reply::Fail);
        assert_eq!(tracker(fetcher).peek("a"), None);
    }

    #[test]
    fn test_segment_token_policy() {
        let policy = SegmentTokenPolicy;
        assert!(policy.is_live(b"#EXTM3U\nchunk_1.ts?x=1"));
        assert!(!policy.is_live(b"#EXTM3U\nchunk_1.m4s"));
        assert!(!policy.is_live(b""));
    }
}
