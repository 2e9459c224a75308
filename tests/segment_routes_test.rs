mod common;

use axum::http::{StatusCode, header};

use common::*;
use hls_proxy::config::ProxyConfig;

fn cloud_only_origin() -> std::sync::Arc<ScriptedOrigin> {
    let origin = ScriptedOrigin::new();
    origin.set(LIVE_URL, Scripted::Fail);
    origin
}

fn segment_url(name: &str) -> String {
    format!("{CLOUD_BASE}{name}")
}

#[tokio::test]
async fn test_miss_streams_from_origin_and_hit_skips_it() {
    let origin = cloud_only_origin();
    origin.body(&segment_url("segment1.ts"), "transport-stream-bytes");
    let app = app(origin.clone(), ProxyConfig::default());

    let (status, headers, first) = get(&app, "/proxy/a/segment1.ts?v=1700000000000").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "video/mp2t");
    assert_eq!(headers.get(header::ACCEPT_RANGES).unwrap(), "bytes");
    assert_eq!(&first[..], b"transport-stream-bytes");

    let (status, headers, second) = get(&app, "/proxy/a/segment1.ts?v=1700000000001").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "video/mp2t");
    assert_eq!(second, first);

    // The cache-busting token is not forwarded and the hit made no fetch
    assert_eq!(origin.count(&segment_url("segment1.ts")), 1);
}

#[tokio::test]
async fn test_preload_fetches_following_segments() {
    let origin = cloud_only_origin();
    origin.body(&segment_url("chunk_12.ts"), "twelve");
    origin.body(&segment_url("chunk_13.ts"), "thirteen");
    origin.body(&segment_url("chunk_14.ts"), "fourteen");
    origin.body(&segment_url("chunk_15.ts"), "fifteen");
    let app = app(origin.clone(), ProxyConfig::default());

    let (status, _, _) = get(&app, "/proxy/a/chunk_12.ts").await;
    assert_eq!(status, StatusCode::OK);
    wait_for_cached(&app, "a", 3).await;

    assert_eq!(origin.count(&segment_url("chunk_13.ts")), 1);
    assert_eq!(origin.count(&segment_url("chunk_14.ts")), 1);
    assert_eq!(origin.count(&segment_url("chunk_15.ts")), 0);

    let (status, _, body) = get(&app, "/proxy/a/chunk_13.ts").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"thirteen");
    assert_eq!(origin.count(&segment_url("chunk_13.ts")), 1);
}

#[tokio::test]
async fn test_oversize_segment_is_delivered_but_not_cached() {
    let origin = cloud_only_origin();
    let payload = vec![7u8; 64];
    origin.body(&segment_url("big1.ts"), payload.clone());
    let config = ProxyConfig {
        max_bytes_per_segment: 16,
        preload_segments: 0,
        ..ProxyConfig::default()
    };
    let app = app(origin.clone(), config);

    for _ in 0..2 {
        let (status, _, body) = get(&app, "/proxy/a/big1.ts").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.to_vec(), payload);
    }

    assert_eq!(origin.count(&segment_url("big1.ts")), 2);
    let (_, _, body) = get(&app, "/status/a").await;
    let status: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(status["cache_segments"], 0);
}

#[tokio::test]
async fn test_upstream_error_status_is_propagated_with_empty_body() {
    let origin = cloud_only_origin();
    origin.set(&segment_url("segment1.ts"), Scripted::Status(403));
    let app = app(origin, ProxyConfig::default());

    let (status, _, body) = get(&app, "/proxy/a/segment1.ts").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body.is_empty());

    let (status, _, _) = get(&app, "/proxy/a/missing.ts").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_network_failure_before_body_is_bad_gateway() {
    let origin = cloud_only_origin();
    origin.set(&segment_url("segment1.ts"), Scripted::Fail);
    let app = app(origin, ProxyConfig::default());

    let (status, _, _) = get(&app, "/proxy/a/segment1.ts").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_client_range_is_forwarded_and_partial_body_not_cached() {
    let origin = cloud_only_origin();
    origin.body(&segment_url("segment1.ts"), "0123456789");
    let config = ProxyConfig {
        preload_segments: 0,
        ..ProxyConfig::default()
    };
    let app = app(origin.clone(), config);

    let (status, headers, body) = send(&app, "/proxy/a/segment1.ts", &[("range", "bytes=2-5")]).await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(headers.get(header::CONTENT_RANGE).unwrap(), "bytes 2-5/10");
    assert_eq!(&body[..], b"2345");

    let forwarded = origin
        .calls()
        .into_iter()
        .find(|c| c.url == segment_url("segment1.ts"))
        .unwrap();
    assert_eq!(forwarded.range.as_deref(), Some("bytes=2-5"));

    // Still a miss: the partial body was not stored
    let (status, _, body) = get(&app, "/proxy/a/segment1.ts").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"0123456789");
    assert_eq!(origin.count(&segment_url("segment1.ts")), 2);
}

#[tokio::test]
async fn test_cached_segment_serves_single_range() {
    let origin = cloud_only_origin();
    origin.body(&segment_url("segment1.ts"), "0123456789");
    let config = ProxyConfig {
        preload_segments: 0,
        ..ProxyConfig::default()
    };
    let app = app(origin.clone(), config);

    get(&app, "/proxy/a/segment1.ts").await;
    wait_for_cached(&app, "a", 1).await;

    let (status, headers, body) = send(&app, "/proxy/a/segment1.ts", &[("range", "bytes=0-3")]).await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(headers.get(header::CONTENT_RANGE).unwrap(), "bytes 0-3/10");
    assert_eq!(headers.get(header::CONTENT_LENGTH).unwrap(), "4");
    assert_eq!(&body[..], b"0123");

    let (status, headers, _) = send(&app, "/proxy/a/segment1.ts", &[("range", "bytes=20-")]).await;
    assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(headers.get(header::CONTENT_RANGE).unwrap(), "bytes */10");

    assert_eq!(origin.count(&segment_url("segment1.ts")), 1);
}

#[tokio::test]
async fn test_origin_query_and_subdirectories_are_preserved() {
    let origin = cloud_only_origin();
    origin.body(&format!("{CLOUD_BASE}hd/seg1.aac?sig=abc"), "audio");
    let config = ProxyConfig {
        preload_segments: 0,
        ..ProxyConfig::default()
    };
    let app = app(origin, config);

    let (status, headers, body) = get(&app, "/proxy/a/hd/seg1.aac?sig=abc&v=99").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "audio/aac");
    assert_eq!(&body[..], b"audio");
}

#[tokio::test]
async fn test_path_traversal_is_rejected() {
    let origin = cloud_only_origin();
    let app = app(origin.clone(), ProxyConfig::default());

    let (status, _, _) = get(&app, "/proxy/a/..%2F..%2Fsecret.ts").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(origin.calls().is_empty());
}

#[tokio::test]
async fn test_miss_over_a_real_connection_is_cached_and_preloads() {
    let origin = cloud_only_origin();
    origin.body(&segment_url("chunk_12.ts"), "twelve");
    origin.body(&segment_url("chunk_13.ts"), "thirteen");
    origin.body(&segment_url("chunk_14.ts"), "fourteen");
    let app = app(origin.clone(), ProxyConfig::default());
    let base = serve_on_socket(app.clone()).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base}/proxy/a/chunk_12.ts"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.content_length(), Some(6));
    assert_eq!(&response.bytes().await.unwrap()[..], b"twelve");

    wait_for_cached(&app, "a", 3).await;
    assert_eq!(origin.count(&segment_url("chunk_13.ts")), 1);
    assert_eq!(origin.count(&segment_url("chunk_14.ts")), 1);

    let body = client
        .get(format!("{base}/proxy/a/chunk_12.ts"))
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(&body[..], b"twelve");
    assert_eq!(origin.count(&segment_url("chunk_12.ts")), 1);
}

#[tokio::test]
async fn test_empty_origin_body_is_not_cached() {
    let origin = cloud_only_origin();
    origin.body(&segment_url("segment1.ts"), "");
    let config = ProxyConfig {
        preload_segments: 0,
        ..ProxyConfig::default()
    };
    let app = app(origin.clone(), config);

    let (status, _, body) = get(&app, "/proxy/a/segment1.ts").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());

    origin.body(&segment_url("segment1.ts"), "0123456789");
    let (status, _, body) = get(&app, "/proxy/a/segment1.ts").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"0123456789");
    assert_eq!(origin.count(&segment_url("segment1.ts")), 2);
}
