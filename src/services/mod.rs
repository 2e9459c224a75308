//! Service layer
//!
//! Services sit underneath the proxy core and own its two external
//! dependencies: the channel configuration file and the upstream origins.
//!
//! # Services
//!
//! - **ChannelStore**: loads `channels.json`, hands out immutable snapshots
//!   and supports atomic reloads
//! - **OriginFetcher**: the only component that talks to origin servers
//!
//! # Usage
//!
//! ```rust,no_run
//! use hls_proxy::config::ProxyConfig;
//! use hls_proxy::services::{ChannelStore, HttpOriginFetcher};
//!
//! # async fn example() -> hls_proxy::errors::AppResult<()> {
//! let store = ChannelStore::load("channels.json").await?;
//! let fetcher = HttpOriginFetcher::new(&ProxyConfig::default())?;
//! # Ok(())
//! # }
//! ```

pub mod channel_store;
pub mod origin_fetcher;

pub use channel_store::ChannelStore;
pub use origin_fetcher::{ByteStream, HttpOriginFetcher, OriginFetcher, OriginRequest, OriginResponse};
