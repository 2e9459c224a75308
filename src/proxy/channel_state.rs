//! Mutable per-channel state
//!
//! Every channel gets its own liveness record, last-good manifest and
//! segment cache. State is created lazily on first use and dropped when a
//! channel disappears from the configuration.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tokio::time::Instant;
use tracing::debug;

use super::segment_cache::{SegmentCache, SegmentCacheLimits};

/// Last liveness verdict for a channel
#[derive(Debug, Clone, Copy, Default)]
pub struct LivenessRecord {
    pub is_live: bool,
    /// `None` until the first probe completes
    pub checked_at: Option<Instant>,
}

/// Last manifest successfully fetched from an origin
#[derive(Debug, Clone)]
pub struct ManifestCacheEntry {
    pub text: String,
    pub origin_url: String,
    pub from_live: bool,
    pub fetched_at: Instant,
}

pub struct ChannelState {
    liveness: Mutex<LivenessRecord>,
    manifest: Mutex<Option<ManifestCacheEntry>>,
    pub segments: SegmentCache,
}

impl ChannelState {
    pub fn new(limits: SegmentCacheLimits) -> Self {
        Self {
            liveness: Mutex::new(LivenessRecord::default()),
            manifest: Mutex::new(None),
            segments: SegmentCache::new(limits),
        }
    }

    pub fn liveness(&self) -> LivenessRecord {
        *lock(&self.liveness)
    }

    /// Record a verdict, returning the previous one
    pub fn set_liveness(&self, is_live: bool, checked_at: Instant) -> LivenessRecord {
        let mut record = lock(&self.liveness);
        let previous = *record;
        *record = LivenessRecord {
            is_live,
            checked_at: Some(checked_at),
        };
        previous
    }

    pub fn manifest(&self) -> Option<ManifestCacheEntry> {
        lock(&self.manifest).clone()
    }

    pub fn set_manifest(&self, entry: ManifestCacheEntry) {
        *lock(&self.manifest) = Some(entry);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// All per-channel state, keyed by channel name
pub struct ChannelRegistry {
    states: RwLock<HashMap<String, Arc<ChannelState>>>,
    limits: SegmentCacheLimits,
}

impl ChannelRegistry {
    pub fn new(limits: SegmentCacheLimits) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            limits,
        }
    }

    pub fn get(&self, channel: &str) -> Option<Arc<ChannelState>> {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .cloned()
    }

    pub fn get_or_create(&self, channel: &str) -> Arc<ChannelState> {
        if let Some(state) = self.get(channel) {
            return state;
        }

        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(channel.to_string())
            .or_insert_with(|| {
                debug!("Creating state for channel '{}'", channel);
                Arc::new(ChannelState::new(self.limits))
            })
            .clone()
    }

    /// Drop state for channels not in `keep`, returning how many were removed
    pub fn retain<'a, I>(&self, keep: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let keep: std::collections::HashSet<&str> = keep.into_iter().collect();
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        let before = states.len();
        states.retain(|name, _| keep.contains(name.as_str()));
        before - states.len()
    }

    pub fn len(&self) -> usize {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
