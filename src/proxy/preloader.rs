//! Speculative fetching of upcoming segments
//!
//! After a segment is served, the next few segments in sequence are fetched
//! into the channel's cache so that clients following the playlist hit the
//! cache. Preloads are best effort: failures are logged at debug level and
//! dropped, nothing is retried, and no client ever waits on them.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use regex::Regex;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::ProxyConfig;
use crate::errors::AppResult;
use crate::services::{OriginFetcher, OriginRequest};
use crate::utils::url::UrlUtils;

use super::channel_state::ChannelRegistry;

static SEGMENT_INDEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+)(\.(?:ts|aac|m4s|mp4))$").expect("segment index pattern is valid")
});

/// Names of the `count` segments following `name`, keeping any zero padding.
///
/// Returns an empty list when the name has no trailing index.
pub fn next_segment_names(name: &str, count: usize) -> Vec<String> {
    let path = UrlUtils::strip_query(name);
    let Some(caps) = SEGMENT_INDEX.captures(path) else {
        return Vec::new();
    };
    let (Some(digits), Some(ext)) = (caps.get(1), caps.get(2)) else {
        return Vec::new();
    };
    let Ok(index) = digits.as_str().parse::<u64>() else {
        return Vec::new();
    };

    let prefix = &path[..digits.start()];
    let width = digits.as_str().len();
    (1..=count as u64)
        .filter_map(|offset| index.checked_add(offset))
        .map(|next| format!("{prefix}{next:0width$}{}", ext.as_str()))
        .collect()
}

pub struct Preloader {
    fetcher: Arc<dyn OriginFetcher>,
    registry: Arc<ChannelRegistry>,
    config: ProxyConfig,
    in_flight: Arc<Mutex<HashSet<(String, String)>>>,
    slots: Arc<Semaphore>,
}

impl Preloader {
    pub fn new(
        fetcher: Arc<dyn OriginFetcher>,
        registry: Arc<ChannelRegistry>,
        config: ProxyConfig,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_inflight_preloads));
        Self {
            fetcher,
            registry,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            slots,
        }
    }

    /// Spawn background fetches for the segments after `served`.
    ///
    /// Candidates already cached, already being fetched, or arriving while
    /// every preload slot is busy are skipped. The returned handles are only
    /// of interest to tests; dropping them does not cancel the work.
    pub fn schedule(&self, channel: &str, base_dir: &str, served: &str) -> Vec<JoinHandle<()>> {
        if self.config.preload_segments == 0 {
            return Vec::new();
        }

        let state = self.registry.get_or_create(channel);
        let mut handles = Vec::new();

        for name in next_segment_names(served, self.config.preload_segments) {
            if state.segments.contains_fresh(&name) {
                continue;
            }

            let key = (channel.to_string(), name.clone());
            if !lock(&self.in_flight).insert(key.clone()) {
                continue;
            }

            let Ok(permit) = self.slots.clone().try_acquire_owned() else {
                debug!("Preload slots exhausted, dropping {}/{}", channel, name);
                lock(&self.in_flight).remove(&key);
                continue;
            };

            let url = match UrlUtils::join(base_dir, &name) {
                Ok(url) => url,
                Err(e) => {
                    debug!("Cannot build preload URL for {}: {}", name, e);
                    lock(&self.in_flight).remove(&key);
                    continue;
                }
            };

            let fetcher = self.fetcher.clone();
            let in_flight = self.in_flight.clone();
            let state = state.clone();
            let timeout = self.config.fetch_timeout;
            let max_bytes = self.config.max_bytes_per_segment;

            handles.push(tokio::spawn(async move {
                let result = async {
                    let bytes = fetch_segment(fetcher.as_ref(), &url, timeout, max_bytes).await?;
                    state.segments.put(&name, bytes)
                };
                match tokio::time::timeout(timeout, result).await {
                    Ok(Ok(())) => debug!("Preloaded {}/{}", key.0, name),
                    Ok(Err(e)) => debug!("Preload of {}/{} dropped: {}", key.0, name, e),
                    Err(_) => debug!("Preload of {}/{} timed out", key.0, name),
                }
                lock(&in_flight).remove(&key);
                drop(permit);
            }));
        }

        handles
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }
}

async fn fetch_segment(
    fetcher: &dyn OriginFetcher,
    url: &str,
    timeout: std::time::Duration,
    max_bytes: usize,
) -> AppResult<bytes::Bytes> {
    let response = fetcher.fetch(OriginRequest::new(url, timeout)).await?;
    if !response.is_success() {
        return Err(crate::errors::AppError::origin_status(
            UrlUtils::obfuscate_credentials(url),
            response.status.as_u16(),
        ));
    }
    let bytes = response.into_bytes_limited(max_bytes).await?;
    if bytes.is_empty() {
        return Err(crate::errors::AppError::origin_unavailable(
            UrlUtils::obfuscate_credentials(url),
            "empty body",
        ));
    }
    Ok(bytes)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
