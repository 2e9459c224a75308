//! Shared fixtures for router-level tests: a scripted origin that records
//! every request, and helpers to build the app and send requests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, Bytes},
    http::{HeaderMap, Request, StatusCode},
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

use hls_proxy::{
    config::ProxyConfig,
    errors::{AppError, AppResult},
    models::{ChannelEntry, ChannelMap},
    proxy::{
        HlsProxy,
        segment::{ByteRange, parse_byte_range},
    },
    services::{ChannelStore, OriginFetcher, OriginRequest, OriginResponse},
    web::{AppState, create_router},
};

pub const LIVE_URL: &str = "http://live.example/a/live.m3u8";
pub const CLOUD_URL: &str = "http://cloud.example/a/index.m3u8";
pub const CLOUD_BASE: &str = "http://cloud.example/a/";

#[derive(Clone)]
pub enum Scripted {
    Body(Bytes),
    Status(u16),
    Fail,
}

/// Origin double: answers from a URL table, 404 for anything unknown
#[derive(Default)]
pub struct ScriptedOrigin {
    routes: Mutex<HashMap<String, Scripted>>,
    calls: Mutex<Vec<OriginRequest>>,
}

impl ScriptedOrigin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, url: &str, reply: Scripted) {
        self.routes.lock().unwrap().insert(url.to_string(), reply);
    }

    pub fn body(&self, url: &str, body: impl Into<Bytes>) {
        self.set(url, Scripted::Body(body.into()));
    }

    pub fn calls(&self) -> Vec<OriginRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, url: &str) -> usize {
        self.calls().iter().filter(|c| c.url == url).count()
    }
}

#[async_trait]
impl OriginFetcher for ScriptedOrigin {
    async fn fetch(&self, request: OriginRequest) -> AppResult<OriginResponse> {
        self.calls.lock().unwrap().push(request.clone());
        let reply = self.routes.lock().unwrap().get(&request.url).cloned();

        match reply {
            None => Ok(OriginResponse::from_bytes(StatusCode::NOT_FOUND, Bytes::new())),
            Some(Scripted::Status(code)) => Ok(OriginResponse::from_bytes(
                StatusCode::from_u16(code).unwrap(),
                Bytes::new(),
            )),
            Some(Scripted::Fail) => Err(AppError::origin_unavailable(request.url, "connection refused")),
            Some(Scripted::Body(body)) => {
                let len = body.len() as u64;
                match request.range.as_deref().map(|r| parse_byte_range(r, len)) {
                    Some(ByteRange::Partial { start, end }) => {
                        let mut response = OriginResponse::from_bytes(
                            StatusCode::PARTIAL_CONTENT,
                            body.slice(start as usize..=end as usize),
                        );
                        response.content_range = Some(format!("bytes {start}-{end}/{len}"));
                        Ok(response)
                    }
                    _ => Ok(OriginResponse::from_bytes(StatusCode::OK, body)),
                }
            }
        }
    }
}

pub fn channels() -> ChannelMap {
    let mut entries = BTreeMap::new();
    entries.insert(
        "a".to_string(),
        ChannelEntry {
            live: Some(LIVE_URL.to_string()),
            cloud: Some(CLOUD_URL.to_string()),
        },
    );
    ChannelMap::from_entries(entries).0
}

pub fn app(origin: Arc<ScriptedOrigin>, config: ProxyConfig) -> Router {
    let store = Arc::new(ChannelStore::new(channels()));
    let proxy = Arc::new(HlsProxy::new(store, origin, config).unwrap());
    create_router(AppState { proxy })
}

pub async fn send(app: &Router, uri: &str, headers: &[(&str, &str)]) -> (StatusCode, HeaderMap, Bytes) {
    let mut builder = Request::builder().uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let response = app
        .clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body)
}

pub async fn get(app: &Router, uri: &str) -> (StatusCode, HeaderMap, Bytes) {
    send(app, uri, &[]).await
}

/// Poll `/status/{channel}` until the cache holds `expected` segments
pub async fn wait_for_cached(app: &Router, channel: &str, expected: u64) {
    for _ in 0..200 {
        let (_, _, body) = get(app, &format!("/status/{channel}")).await;
        let status: serde_json::Value = serde_json::from_slice(&body).unwrap();
        if status["cache_segments"].as_u64() == Some(expected) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("cache for '{channel}' never reached {expected} segment(s)");
}

/// Serve `app` on an ephemeral local port, returning its base URL
pub async fn serve_on_socket(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}
