//! Configuration default values
//!
//! This module contains all the default values for configuration options,
//! making them easily changeable in one central location.

// Web server defaults
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;

// Channel store defaults
pub const DEFAULT_CHANNELS_PATH: &str = "channels.json";

// Segment cache defaults
pub const DEFAULT_SEGMENT_TTL_MS: u64 = 30_000;
pub const DEFAULT_MAX_SEGMENTS_PER_CHANNEL: usize = 60;
pub const DEFAULT_MAX_BYTES_PER_SEGMENT: usize = 2 * 1024 * 1024; // typical .ts is < 1MB

// Liveness defaults
pub const DEFAULT_LIVENESS_TTL_MS: u64 = 5_000;
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 1_500;
pub const DEFAULT_PROBE_BYTES: usize = 200;

// Origin fetch defaults
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_MANIFEST_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_MANIFEST_CACHE_TTL_MS: u64 = 10_000;
pub const DEFAULT_MAX_CONCURRENT_ORIGIN_REQUESTS: usize = 64;

// Preload defaults
pub const DEFAULT_PRELOAD_SEGMENTS: usize = 2;
pub const DEFAULT_MAX_INFLIGHT_PRELOADS: usize = 16;

// Manifest rewriting defaults
pub const DEFAULT_CACHE_BUSTING: bool = true;

// Environment variable prefix for figment overrides (nested keys split on "__")
pub const ENV_PREFIX: &str = "HLS_PROXY_";
