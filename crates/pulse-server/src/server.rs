//! `GatewayServer` — wires the managers, bridge, and HTTP surface.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tracing::info;

use pulse_backbone::EventBus;
use pulse_channels::ChannelRegistry;

use crate::auth::Authenticator;
use crate::bridge::EventBridge;
use crate::config::GatewayConfig;
use crate::routes;
use crate::shutdown::ShutdownCoordinator;
use crate::socket::SocketManager;
use crate::stream::SseManager;

/// Shared state accessible from route handlers.
#[derive(Clone)]
pub struct AppState {
    /// Gateway configuration.
    pub config: Arc<GatewayConfig>,
    /// Channel registry and ACL.
    pub registry: Arc<ChannelRegistry>,
    /// Event backbone.
    pub bus: Arc<EventBus>,
    /// Streaming connection manager.
    pub sse: Arc<SseManager>,
    /// Socket connection manager.
    pub socket: Arc<SocketManager>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus render handle, when the recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The Pulse gateway server.
pub struct GatewayServer {
    state: AppState,
}

impl GatewayServer {
    /// Create a server. The instance identity for event sourcing is taken
    /// from the bus.
    pub fn new(
        config: GatewayConfig,
        registry: Arc<ChannelRegistry>,
        bus: Arc<EventBus>,
        authenticator: Arc<dyn Authenticator>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let source = bus.source().to_owned();
        let sse = Arc::new(SseManager::new(
            registry.clone(),
            bus.clone(),
            &config,
            source.clone(),
        ));
        let socket = SocketManager::new(
            registry.clone(),
            bus.clone(),
            authenticator,
            &config,
            source,
        );
        let state = AppState {
            config: Arc::new(config),
            registry,
            bus,
            sse,
            socket,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics,
        };
        Self { state }
    }

    /// Register backbone listeners feeding both managers. Call once,
    /// before `listen()`.
    pub async fn install_bridge(&self) {
        EventBridge::new(
            self.state.bus.clone(),
            self.state.sse.clone(),
            self.state.socket.clone(),
        )
        .install()
        .await;
    }

    /// Build the axum router.
    pub fn router(&self) -> Router {
        routes::router(self.state.clone())
    }

    /// Bind and serve. Returns the bound address and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = tokio::net::TcpListener::bind((
            self.state.config.host.as_str(),
            self.state.config.port,
        ))
        .await?;
        let addr = listener.local_addr()?;
        info!(%addr, "gateway listening");

        let router = self.router();
        let shutdown = self.state.shutdown.token();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(err) = serve.await {
                tracing::error!(error = %err, "server exited with error");
            }
        });
        Ok((addr, handle))
    }

    /// Shared state (managers, registry, bus).
    #[must_use]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Streaming connection manager.
    #[must_use]
    pub fn sse(&self) -> &Arc<SseManager> {
        &self.state.sse
    }

    /// Socket connection manager.
    #[must_use]
    pub fn socket(&self) -> &Arc<SocketManager> {
        &self.state.socket
    }

    /// Shutdown coordinator.
    #[must_use]
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Gateway configuration.
    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.state.config
    }
}
