//! HLS proxy core
//!
//! `HlsProxy` wires the per-channel components together and is the single
//! object the web layer talks to:
//!
//! - [`liveness::LivenessTracker`] decides live vs cloud origin per channel
//! - [`manifest::ManifestRewriter`] fetches and rewrites playlists
//! - [`segment::SegmentServer`] serves segments from cache or origin
//! - [`preloader::Preloader`] warms the cache with upcoming segments
//!
//! All mutable state is held per channel in a [`channel_state::ChannelRegistry`].

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::ProxyConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{Channel, ChannelMap};
use crate::services::{ChannelStore, OriginFetcher};

pub mod channel_state;
pub mod liveness;
pub mod manifest;
pub mod preloader;
pub mod segment;
pub mod segment_cache;

use channel_state::ChannelRegistry;
use liveness::{LivenessTracker, ProbePolicy};
use manifest::{ManifestResponse, ManifestRewriter};
use preloader::Preloader;
use segment::{SegmentRequest, SegmentResponse, SegmentServer};
use segment_cache::SegmentCacheLimits;

/// Snapshot of one channel's proxy state
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChannelStatus {
    pub channel: String,
    /// `None` until the first liveness probe
    pub live: Option<bool>,
    pub cache_segments: usize,
    pub cache_bytes: usize,
    pub manifest_cached: bool,
}

pub struct HlsProxy {
    store: Arc<ChannelStore>,
    /// Channel map as of the last prune
    known: Mutex<Arc<ChannelMap>>,
    registry: Arc<ChannelRegistry>,
    tracker: Arc<LivenessTracker>,
    manifests: ManifestRewriter,
    segments: SegmentServer,
}

impl HlsProxy {
    pub fn new(
        store: Arc<ChannelStore>,
        fetcher: Arc<dyn OriginFetcher>,
        config: ProxyConfig,
    ) -> AppResult<Self> {
        Self::build(store, fetcher, config, None)
    }

    /// Build with a custom liveness heuristic
    pub fn with_probe_policy(
        store: Arc<ChannelStore>,
        fetcher: Arc<dyn OriginFetcher>,
        config: ProxyConfig,
        policy: Box<dyn ProbePolicy>,
    ) -> AppResult<Self> {
        Self::build(store, fetcher, config, Some(policy))
    }

    fn build(
        store: Arc<ChannelStore>,
        fetcher: Arc<dyn OriginFetcher>,
        config: ProxyConfig,
        policy: Option<Box<dyn ProbePolicy>>,
    ) -> AppResult<Self> {
        config.validate()?;
        let max_segments = NonZeroUsize::new(config.max_segments_per_channel).ok_or_else(|| {
            AppError::config_invalid("proxy.max_segments_per_channel must be at least 1")
        })?;

        let registry = Arc::new(ChannelRegistry::new(SegmentCacheLimits {
            ttl: config.segment_ttl,
            max_segments,
            max_bytes_per_segment: config.max_bytes_per_segment,
        }));

        let tracker = Arc::new(match policy {
            Some(policy) => {
                LivenessTracker::with_policy(fetcher.clone(), registry.clone(), config.clone(), policy)
            }
            None => LivenessTracker::new(fetcher.clone(), registry.clone(), config.clone()),
        });
        let preloader = Arc::new(Preloader::new(
            fetcher.clone(),
            registry.clone(),
            config.clone(),
        ));
        let manifests = ManifestRewriter::new(
            fetcher.clone(),
            tracker.clone(),
            registry.clone(),
            config.clone(),
        );
        let segments = SegmentServer::new(fetcher, tracker.clone(), registry.clone(), preloader, config);

        Ok(Self {
            known: Mutex::new(store.snapshot()),
            store,
            registry,
            tracker,
            manifests,
            segments,
        })
    }

    pub fn store(&self) -> &Arc<ChannelStore> {
        &self.store
    }

    fn channel(&self, name: &str) -> AppResult<Arc<Channel>> {
        self.store
            .get(name)
            .ok_or_else(|| AppError::channel_not_found(name))
    }

    pub async fn manifest(&self, channel: &str) -> AppResult<ManifestResponse> {
        let channel = self.channel(channel)?;
        self.manifests.get_manifest(&channel).await
    }

    pub async fn segment(&self, channel: &str, request: SegmentRequest) -> AppResult<SegmentResponse> {
        let channel = self.channel(channel)?;
        self.segments.serve(channel, request).await
    }

    /// Current state of a channel. Never triggers a probe.
    pub fn status(&self, channel: &str) -> AppResult<ChannelStatus> {
        let channel = self.channel(channel)?;
        let state = self.registry.get(&channel.name);

        Ok(ChannelStatus {
            live: self.tracker.peek(&channel.name),
            cache_segments: state.as_ref().map_or(0, |s| s.segments.len()),
            cache_bytes: state.as_ref().map_or(0, |s| s.segments.total_bytes()),
            manifest_cached: state.as_ref().is_some_and(|s| s.manifest().is_some()),
            channel: channel.name.clone(),
        })
    }

    /// Drop state of channels that were removed or whose origins changed
    pub fn prune(&self) -> usize {
        let current = self.store.snapshot();
        let previous = std::mem::replace(
            &mut *self.known.lock().unwrap_or_else(PoisonError::into_inner),
            current.clone(),
        );

        let keep = current.names().filter(|name| {
            match (previous.get(name), current.get(name)) {
                (Some(before), Some(after)) => before.origins == after.origins,
                _ => true,
            }
        });
        let dropped = self.registry.retain(keep);
        if dropped > 0 {
            info!("Dropped state for {} removed or changed channel(s)", dropped);
        }
        dropped
    }

    /// Prune whenever the channel store publishes a new map.
    pub fn spawn_pruner(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let proxy = self.clone();
        let mut changes: watch::Receiver<u64> = self.store.subscribe();
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                debug!("Channel map generation {}", *changes.borrow_and_update());
                proxy.prune();
            }
        })
    }
}
