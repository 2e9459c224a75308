//! HTTP request handlers organized by route group

pub mod health;
pub mod proxy;
pub mod status;
