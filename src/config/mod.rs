use anyhow::Result;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

pub mod defaults;
pub mod duration_serde;

use crate::errors::{AppError, AppResult};
use defaults::*;
use duration_serde::duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// JSON file holding the `name -> { live, cloud }` mapping
    #[serde(default = "default_channels_path")]
    pub path: PathBuf,
}

/// Tuning for origin selection, manifest rewriting, segment caching and preloading
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// How long a cached segment may be served
    #[serde(default = "default_segment_ttl", with = "duration")]
    pub segment_ttl: Duration,

    /// How long a liveness verdict is trusted before re-probing
    #[serde(default = "default_liveness_ttl", with = "duration")]
    pub liveness_ttl: Duration,

    /// Deadline for the liveness probe (kept shorter than ordinary fetches)
    #[serde(default = "default_probe_timeout", with = "duration")]
    pub probe_timeout: Duration,

    /// Number of leading manifest bytes requested by the liveness probe
    #[serde(default = "default_probe_bytes")]
    pub probe_bytes: usize,

    /// Deadline for segment and preload fetches
    #[serde(default = "default_fetch_timeout", with = "duration")]
    pub fetch_timeout: Duration,

    /// Deadline for manifest fetches
    #[serde(default = "default_manifest_timeout", with = "duration")]
    pub manifest_timeout: Duration,

    /// How long the last good manifest may be served when the origin fails
    #[serde(default = "default_manifest_cache_ttl", with = "duration")]
    pub manifest_cache_ttl: Duration,

    /// Number of upcoming segments fetched after each served segment (0 disables)
    #[serde(default = "default_preload_segments")]
    pub preload_segments: usize,

    /// Upper bound on cached segments per channel
    #[serde(default = "default_max_segments_per_channel")]
    pub max_segments_per_channel: usize,

    /// Segments larger than this are streamed through without caching
    #[serde(default = "default_max_bytes_per_segment")]
    pub max_bytes_per_segment: usize,

    /// Append a `v=<token>` query parameter to rewritten segment references
    #[serde(default = "default_cache_busting")]
    pub cache_busting: bool,

    /// Global ceiling on concurrent outbound origin requests (0 = unlimited)
    #[serde(default = "default_max_concurrent_origin_requests")]
    pub max_concurrent_origin_requests: usize,

    /// Bound on concurrently running preload fetches
    #[serde(default = "default_max_inflight_preloads")]
    pub max_inflight_preloads: usize,

    /// User-Agent sent upstream
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

// Web defaults
fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_channels_path() -> PathBuf {
    PathBuf::from(DEFAULT_CHANNELS_PATH)
}

// Proxy defaults
fn default_segment_ttl() -> Duration {
    Duration::from_millis(DEFAULT_SEGMENT_TTL_MS)
}

fn default_liveness_ttl() -> Duration {
    Duration::from_millis(DEFAULT_LIVENESS_TTL_MS)
}

fn default_probe_timeout() -> Duration {
    Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS)
}

fn default_probe_bytes() -> usize {
    DEFAULT_PROBE_BYTES
}

fn default_fetch_timeout() -> Duration {
    Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS)
}

fn default_manifest_timeout() -> Duration {
    Duration::from_millis(DEFAULT_MANIFEST_TIMEOUT_MS)
}

fn default_manifest_cache_ttl() -> Duration {
    Duration::from_millis(DEFAULT_MANIFEST_CACHE_TTL_MS)
}

fn default_preload_segments() -> usize {
    DEFAULT_PRELOAD_SEGMENTS
}

fn default_max_segments_per_channel() -> usize {
    DEFAULT_MAX_SEGMENTS_PER_CHANNEL
}

fn default_max_bytes_per_segment() -> usize {
    DEFAULT_MAX_BYTES_PER_SEGMENT
}

fn default_cache_busting() -> bool {
    DEFAULT_CACHE_BUSTING
}

fn default_max_concurrent_origin_requests() -> usize {
    DEFAULT_MAX_CONCURRENT_ORIGIN_REQUESTS
}

fn default_max_inflight_preloads() -> usize {
    DEFAULT_MAX_INFLIGHT_PRELOADS
}

fn default_user_agent() -> String {
    format!("hls-proxy/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            path: default_channels_path(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            segment_ttl: default_segment_ttl(),
            liveness_ttl: default_liveness_ttl(),
            probe_timeout: default_probe_timeout(),
            probe_bytes: default_probe_bytes(),
            fetch_timeout: default_fetch_timeout(),
            manifest_timeout: default_manifest_timeout(),
            manifest_cache_ttl: default_manifest_cache_ttl(),
            preload_segments: default_preload_segments(),
            max_segments_per_channel: default_max_segments_per_channel(),
            max_bytes_per_segment: default_max_bytes_per_segment(),
            cache_busting: default_cache_busting(),
            max_concurrent_origin_requests: default_max_concurrent_origin_requests(),
            max_inflight_preloads: default_max_inflight_preloads(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            web: WebConfig::default(),
            channels: ChannelsConfig::default(),
            proxy: ProxyConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// Reject settings the proxy cannot operate with
    pub fn validate(&self) -> AppResult<()> {
        if self.max_segments_per_channel == 0 {
            return Err(AppError::config_invalid(
                "proxy.max_segments_per_channel must be at least 1",
            ));
        }

        let timeouts = [
            ("proxy.probe_timeout", self.probe_timeout),
            ("proxy.fetch_timeout", self.fetch_timeout),
            ("proxy.manifest_timeout", self.manifest_timeout),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                return Err(AppError::config_invalid(format!("{name} must be non-zero")));
            }
        }

        Ok(())
    }

    /// Global outbound ceiling, `None` when unlimited
    pub fn origin_concurrency_limit(&self) -> Option<usize> {
        (self.max_concurrent_origin_requests > 0).then_some(self.max_concurrent_origin_requests)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_file =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());
        Self::load_from_file(&config_file)
    }

    /// Layer defaults, the TOML file and `HLS_PROXY_*` environment variables.
    ///
    /// A missing file is created with the defaults so operators have a template.
    pub fn load_from_file(config_file: &str) -> Result<Self> {
        if !std::path::Path::new(config_file).exists() {
            let contents = toml::to_string_pretty(&Self::default())?;
            std::fs::write(config_file, contents)?;
            info!("Created default config file: {}", config_file);
        }

        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Env::raw().only(&["PORT"]).map(|_| "web.port".into()))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.channels.path.as_os_str().is_empty() {
            return Err(AppError::config_invalid("channels.path must not be empty"));
        }
        self.proxy.validate()
    }
}
