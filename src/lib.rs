//! Caching HLS reverse proxy
//!
//! Fronts each configured channel's live and cloud origins, rewrites
//! manifests so segment requests come back through the proxy, and serves
//! segments from a per-channel in-memory cache with speculative preloading.

pub mod config;
pub mod errors;
pub mod models;
pub mod proxy;
pub mod services;
pub mod utils;
pub mod web;
