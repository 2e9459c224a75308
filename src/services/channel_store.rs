//! Channel configuration store
//!
//! Holds the current `name -> Channel` snapshot. Readers take an `Arc` to an
//! immutable map, so a reload is observed atomically: a request sees either
//! the old map or the new one, never a mix. Each replacement bumps a
//! generation counter published over a `watch` channel so per-channel state
//! can be pruned when channels disappear.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::watch;
use tracing::{info, warn};

use crate::errors::{AppError, AppResult};
use crate::models::{Channel, ChannelEntry, ChannelMap};

pub struct ChannelStore {
    path: Option<PathBuf>,
    current: RwLock<Arc<ChannelMap>>,
    generation: watch::Sender<u64>,
}

impl ChannelStore {
    /// In-memory store with no backing file
    pub fn new(map: ChannelMap) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            path: None,
            current: RwLock::new(Arc::new(map)),
            generation,
        }
    }

    /// Load the channel file. Invalid entries are skipped with a warning; an
    /// unreadable or malformed file is an error.
    pub async fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let map = read_channel_file(&path).await?;
        info!(
            "Loaded {} channel(s) from {}",
            map.len(),
            path.display()
        );

        let mut store = Self::new(map);
        store.path = Some(path);
        Ok(store)
    }

    pub fn snapshot(&self) -> Arc<ChannelMap> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Channel>> {
        self.snapshot().get(name)
    }

    /// Swap in a new map and notify subscribers
    pub fn replace(&self, map: ChannelMap) {
        let count = map.len();
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(map);
        self.generation.send_modify(|g| *g += 1);
        info!("Channel map replaced ({} channel(s))", count);
    }

    /// Re-read the backing file. On failure the current map stays in place.
    pub async fn reload(&self) -> AppResult<usize> {
        let Some(path) = &self.path else {
            return Err(AppError::config_invalid(
                "channel store has no backing file to reload",
            ));
        };

        let map = read_channel_file(path).await?;
        let count = map.len();
        self.replace(map);
        Ok(count)
    }

    /// Receiver that changes whenever the map is replaced
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

async fn read_channel_file(path: &Path) -> AppResult<ChannelMap> {
    let raw = tokio::fs::read_to_string(path).await?;
    let entries: BTreeMap<String, ChannelEntry> = serde_json::from_str(&raw).map_err(|e| {
        AppError::config_invalid(format!(
            "failed to parse channel file {}: {e}",
            path.display()
        ))
    })?;

    let (map, rejected) = ChannelMap::from_entries(entries);
    for error in rejected {
        warn!("Skipping channel entry: {}", error);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_load_skips_invalid_entries() {
        let file = write_file(
            r#"{
                "a": {"live": "http://o/live.m3u8", "cloud": "http://o/cloud.m3u8"},
                "broken": {},
                "cloud_only": {"cloud": "http://o/cloud.m3u8"}
            }"#,
        );

        let store = ChannelStore::load(file.path()).await.unwrap();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(store.get("a").is_some());
        assert!(store.get("broken").is_none());
        assert_eq!(store.get("cloud_only").unwrap().live_url(), None);
    }

    #[tokio::test]
    async fn test_load_rejects_malformed_json() {
        let file = write_file("{ not json");
        let err = ChannelStore::load(file.path()).await.err().unwrap();
        assert!(matches!(err, AppError::ConfigInvalid { .. }));
    }

    #[tokio::test]
    async fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ChannelStore::load(dir.path().join("nope.json"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::Io(_)));
    }

    #[tokio::test]
    async fn test_reload_replaces_snapshot_and_bumps_generation() {
        let file = write_file(r#"{"a": {"live": "http://o/a.m3u8"}}"#);
        let store = ChannelStore::load(file.path()).await.unwrap();
        let mut rx = store.subscribe();
        let before = store.snapshot();

        std::fs::write(file.path(), r#"{"b": {"cloud": "http://o/b.m3u8"}}"#).unwrap();
        assert_eq!(store.reload().await.unwrap(), 1);

        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 1);
        assert!(store.get("a").is_none());
        assert!(store.get("b").is_some());
        // Earlier snapshots are unaffected
        assert!(before.contains("a"));
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_current_map() {
        let file = write_file(r#"{"a": {"live": "http://o/a.m3u8"}}"#);
        let store = ChannelStore::load(file.path()).await.unwrap();

        std::fs::write(file.path(), "[]").unwrap();
        assert!(store.reload().await.is_err());
        assert!(store.get("a").is_some());
    }

    #[tokio::test]
    async fn test_in_memory_store_cannot_reload() {
        let store = ChannelStore::new(ChannelMap::default());
        assert!(store.reload().await.is_err());
        assert!(store.path().is_none());
    }
}
