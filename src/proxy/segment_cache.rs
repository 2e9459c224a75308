//! Per-channel in-memory segment cache
//!
//! Bounded by entry count (LRU eviction) and by a per-entry byte ceiling.
//! Entries expire `segment_ttl` after insertion; expired entries are never
//! served and are removed when observed.

use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use lru::LruCache;
use tokio::time::Instant;

use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone)]
struct SegmentEntry {
    bytes: Bytes,
    stored_at: Instant,
}

/// Limits applied to every channel's cache
#[derive(Debug, Clone, Copy)]
pub struct SegmentCacheLimits {
    pub ttl: Duration,
    pub max_segments: NonZeroUsize,
    pub max_bytes_per_segment: usize,
}

pub struct SegmentCache {
    entries: Mutex<LruCache<String, SegmentEntry>>,
    limits: SegmentCacheLimits,
}

impl SegmentCache {
    pub fn new(limits: SegmentCacheLimits) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(limits.max_segments)),
            limits,
        }
    }

    pub fn limits(&self) -> SegmentCacheLimits {
        self.limits
    }

    /// Fresh bytes for `name`, promoting the entry. Expired entries are
    /// removed and reported as absent.
    pub fn get(&self, name: &str) -> Option<Bytes> {
        let mut entries = self.lock();
        let expired = match entries.get(name) {
            Some(entry) if entry.stored_at.elapsed() < self.limits.ttl => {
                return Some(entry.bytes.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(name);
        }
        None
    }

    /// Whether a fresh entry exists, without touching recency
    pub fn contains_fresh(&self, name: &str) -> bool {
        self.lock()
            .peek(name)
            .is_some_and(|entry| entry.stored_at.elapsed() < self.limits.ttl)
    }

    /// Store a segment, evicting the least recently used entry when full.
    ///
    /// Bodies over the per-segment ceiling are refused and leave the cache
    /// untouched.
    pub fn put(&self, name: &str, bytes: Bytes) -> AppResult<()> {
        if bytes.len() > self.limits.max_bytes_per_segment {
            return Err(AppError::PayloadTooLarge {
                size: bytes.len(),
                max: self.limits.max_bytes_per_segment,
            });
        }

        self.lock().put(
            name.to_string(),
            SegmentEntry {
                bytes,
                stored_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Number of stored entries, including expired ones not yet observed
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.lock().iter().map(|(_, entry)| entry.bytes.len()).sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, SegmentEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
