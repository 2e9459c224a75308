use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use url::Url;

use crate::errors::{AppError, AppResult};

/// On-disk form of a channel, as found in `channels.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud: Option<String>,
}

/// The upstream manifest URLs a channel can be served from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOrigins {
    Both { live: String, cloud: String },
    LiveOnly { live: String },
    CloudOnly { cloud: String },
}

/// A logical stream with a primary (live) and fallback (cloud) origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub name: String,
    pub origins: ChannelOrigins,
}

impl Channel {
    /// Build a channel from its on-disk entry.
    ///
    /// Blank URLs count as missing; a channel needs at least one parseable origin.
    pub fn from_entry(name: &str, entry: &ChannelEntry) -> AppResult<Self> {
        let live = normalize_origin(name, "live", entry.live.as_deref())?;
        let cloud = normalize_origin(name, "cloud", entry.cloud.as_deref())?;

        let origins = match (live, cloud) {
            (Some(live), Some(cloud)) => ChannelOrigins::Both { live, cloud },
            (Some(live), None) => ChannelOrigins::LiveOnly { live },
            (None, Some(cloud)) => ChannelOrigins::CloudOnly { cloud },
            (None, None) => {
                return Err(AppError::config_invalid(format!(
                    "channel '{name}' has neither a live nor a cloud URL"
                )));
            }
        };

        Ok(Self {
            name: name.to_string(),
            origins,
        })
    }

    pub fn live_url(&self) -> Option<&str> {
        match &self.origins {
            ChannelOrigins::Both { live, .. } | ChannelOrigins::LiveOnly { live } => {
                Some(live.as_str())
            }
            ChannelOrigins::CloudOnly { .. } => None,
        }
    }

    pub fn cloud_url(&self) -> Option<&str> {
        match &self.origins {
            ChannelOrigins::Both { cloud, .. } | ChannelOrigins::CloudOnly { cloud } => {
                Some(cloud.as_str())
            }
            ChannelOrigins::LiveOnly { .. } => None,
        }
    }

    /// Manifest URL to use for the given liveness verdict.
    ///
    /// A channel without a cloud origin keeps using its live URL when not live.
    pub fn origin_url(&self, is_live: bool) -> &str {
        match &self.origins {
            ChannelOrigins::Both { live, cloud } => {
                if is_live {
                    live
                } else {
                    cloud
                }
            }
            ChannelOrigins::LiveOnly { live } => live,
            ChannelOrigins::CloudOnly { cloud } => cloud,
        }
    }

    pub fn to_entry(&self) -> ChannelEntry {
        ChannelEntry {
            live: self.live_url().map(str::to_string),
            cloud: self.cloud_url().map(str::to_string),
        }
    }
}

fn normalize_origin(channel: &str, field: &str, value: Option<&str>) -> AppResult<Option<String>> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };

    let parsed = Url::parse(value).map_err(|e| {
        AppError::config_invalid(format!("channel '{channel}' has an invalid {field} URL: {e}"))
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(AppError::config_invalid(format!(
            "channel '{channel}' {field} URL must be http or https"
        )));
    }

    Ok(Some(value.to_string()))
}

/// Immutable snapshot of all configured channels
#[derive(Debug, Clone, Default)]
pub struct ChannelMap {
    channels: HashMap<String, Arc<Channel>>,
}

impl ChannelMap {
    /// Build a map from on-disk entries, returning the entries that were rejected.
    pub fn from_entries(entries: BTreeMap<String, ChannelEntry>) -> (Self, Vec<AppError>) {
        let mut channels = HashMap::with_capacity(entries.len());
        let mut rejected = Vec::new();

        for (name, entry) in entries {
            match Channel::from_entry(&name, &entry) {
                Ok(channel) => {
                    channels.insert(name, Arc::new(channel));
                }
                Err(e) => rejected.push(e),
            }
        }

        (Self { channels }, rejected)
    }

    pub fn from_channels<I: IntoIterator<Item = Channel>>(channels: I) -> Self {
        Self {
            channels: channels
                .into_iter()
                .map(|c| (c.name.clone(), Arc::new(c)))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn to_entries(&self) -> BTreeMap<String, ChannelEntry> {
        self.channels
            .iter()
            .map(|(name, channel)| (name.clone(), channel.to_entry()))
            .collect()
    }
}
