//! Web layer module
//!
//! HTTP interface of the proxy. Handlers are thin: they extract the request,
//! call into [`HlsProxy`] and map the result through `responses`.
//!
//! # Routes
//!
//! - `GET /proxy/{channel}/playlist.m3u8` - rewritten manifest
//! - `GET /proxy/{channel}/{*path}` - media segment
//! - `GET /status/{channel}` - channel state as JSON
//! - `GET /health` - process health

use anyhow::Result;
use axum::{Router, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::WebConfig;
use crate::proxy::HlsProxy;

pub mod handlers;
pub mod responses;

/// Web server configuration and setup
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<HlsProxy>,
}

impl WebServer {
    pub fn new(config: &WebConfig, proxy: Arc<HlsProxy>) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
        Ok(Self {
            app: create_router(AppState { proxy }),
            addr,
        })
    }

    /// Serve until SIGTERM or SIGINT, then drain in-flight requests
    pub async fn serve(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.addr, e))?;

        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }

    /// Get the host address
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Get the port number
    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

/// Create the router with all routes and middleware
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/status/{channel}", get(handlers::status::channel_status))
        .route(
            "/proxy/{channel}/{*path}",
            get(handlers::proxy::proxy_request),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!("Failed to install signal handlers: {}", e);
                return std::future::pending().await;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, shutting down gracefully");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT (Ctrl+C), shutting down gracefully");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            return std::future::pending().await;
        }
        tracing::info!("Received Ctrl+C, shutting down gracefully");
    }
}
