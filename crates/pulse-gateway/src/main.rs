//! # pulse-gateway
//!
//! Gateway server binary — wires the channel registry, event backbone,
//! and connection managers together and serves the HTTP/WebSocket/SSE
//! surface until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pulse_backbone::{BackboneTransport, EventBus, MemoryTransport, RedisTransport};
use pulse_channels::ChannelRegistry;
use pulse_core::CloseReason;
use pulse_server::auth::StaticTokenAuthenticator;
use pulse_server::{GatewayServer, config, metrics};

/// Pulse gateway server.
#[derive(Parser, Debug)]
#[command(name = "pulse-gateway", about = "Pulse real-time event gateway")]
struct Cli {
    /// Host to bind (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides config; 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the gateway config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Redis URL for the event backbone (overrides config).
    #[arg(long)]
    redis_url: Option<String>,
}

/// Resolve the default config path (`~/.pulse/gateway.json`).
fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".pulse").join("gateway.json")
}

/// Build the token table from `PULSE_ADMIN_TOKEN` / `PULSE_CLIENT_TOKEN`.
///
/// Token issuance is owned by the platform's auth service; the gateway
/// only validates. The static table is the deployment seam until that
/// service is wired in.
fn authenticator_from_env() -> StaticTokenAuthenticator {
    let mut authenticator = StaticTokenAuthenticator::new();
    if let Ok(token) = std::env::var("PULSE_ADMIN_TOKEN") {
        authenticator = authenticator.with_token(&token, &["admin"]);
    }
    if let Ok(token) = std::env::var("PULSE_CLIENT_TOKEN") {
        authenticator = authenticator.with_token(&token, &["user"]);
    }
    authenticator
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let path = cli.config.unwrap_or_else(default_config_path);
    let mut cfg = config::load_from_path(&path).context("failed to load gateway config")?;
    if let Some(host) = cli.host {
        cfg.host = host;
    }
    if let Some(port) = cli.port {
        cfg.port = port;
    }
    if let Some(url) = cli.redis_url {
        cfg.redis_url = Some(url);
    }

    let transport: Arc<dyn BackboneTransport> = match &cfg.redis_url {
        Some(url) => Arc::new(
            RedisTransport::connect(url)
                .await
                .context("failed to connect to the redis backbone")?,
        ),
        None => {
            warn!("no redis url configured; cross-instance fan-out disabled");
            Arc::new(MemoryTransport::default())
        }
    };
    let source = format!("pulse-gateway-{}", uuid::Uuid::now_v7());
    let bus = Arc::new(EventBus::new(transport, source));
    bus.start().await.context("failed to start the event bus")?;

    let registry = Arc::new(ChannelRegistry::new());
    let metrics_handle = metrics::install_recorder();
    let server = GatewayServer::new(
        cfg,
        registry,
        bus.clone(),
        Arc::new(authenticator_from_env()),
        metrics_handle,
    );
    server.install_bridge().await;

    let (addr, serve_handle) = server.listen().await.context("failed to bind gateway")?;
    info!(%addr, "pulse gateway running");

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for shutdown signal")?;
    info!("shutdown signal received, draining connections");

    server
        .socket()
        .disconnect_all(CloseReason::ServerShutdown)
        .await;
    server.sse().disconnect_all().await;
    bus.stop().await;
    server
        .shutdown()
        .graceful_shutdown(vec![serve_handle], None)
        .await;
    info!("pulse gateway stopped");
    Ok(())
}
