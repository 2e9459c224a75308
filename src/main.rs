use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hls_proxy::{
    config::Config,
    proxy::HlsProxy,
    services::{ChannelStore, HttpOriginFetcher},
    utils::url::UrlUtils,
    web::WebServer,
};

#[derive(Parser)]
#[command(name = "hls-proxy")]
#[command(version)]
#[command(about = "Caching HLS reverse proxy with live/cloud origin failover")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Channel mapping file (overrides config file)
    #[arg(long, value_name = "PATH")]
    channels: Option<PathBuf>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = if cli.log_level == "trace" {
        format!("hls_proxy={},tower_http=trace", cli.log_level)
    } else {
        format!("hls_proxy={}", cli.log_level)
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting hls-proxy v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load_from_file(&cli.config)?;
    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }
    if let Some(channels) = cli.channels {
        config.channels.path = channels;
    }

    let store = Arc::new(ChannelStore::load(&config.channels.path).await?);
    let fetcher = Arc::new(HttpOriginFetcher::new(&config.proxy)?);
    let proxy = Arc::new(HlsProxy::new(store.clone(), fetcher, config.proxy.clone())?);

    for name in store.snapshot().names() {
        if let Some(channel) = store.get(name) {
            info!(
                "Channel '{}': live={} cloud={}",
                name,
                channel.live_url().map(UrlUtils::obfuscate_credentials).unwrap_or_else(|| "-".into()),
                channel.cloud_url().map(UrlUtils::obfuscate_credentials).unwrap_or_else(|| "-".into()),
            );
        }
    }

    proxy.spawn_pruner();
    spawn_reload_on_hangup(store);

    let server = WebServer::new(&config.web, proxy)?;
    info!("Listening on {}:{}", server.host(), server.port());
    server.serve().await?;

    info!("Shutdown complete");
    Ok(())
}

/// Re-read the channel file whenever the process receives SIGHUP
#[cfg(unix)]
fn spawn_reload_on_hangup(store: Arc<ChannelStore>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangups = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("SIGHUP reload disabled: {}", e);
            return;
        }
    };

    tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            info!("Received SIGHUP, reloading channels");
            match store.reload().await {
                Ok(count) => info!("Reloaded {} channel(s)", count),
                Err(e) => warn!("Channel reload failed, keeping current map: {}", e),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_on_hangup(_store: Arc<ChannelStore>) {
    warn!("Channel reload on SIGHUP is only supported on unix");
}
