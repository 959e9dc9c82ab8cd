//! # pulse-server
//!
//! The two connection managers of the distribution layer plus their HTTP
//! surface:
//!
//! - [`stream::SseManager`]: one-way streaming connections with per-connection
//!   outbound queues and heartbeat frames
//! - [`socket::SocketManager`]: bidirectional connections with an
//!   authentication handshake, inbound command dispatch, and liveness pings
//! - [`bridge::EventBridge`]: wires backbone events into both managers so
//!   remote and local publishes share one fan-out path
//! - Axum routes for the SSE, WebSocket, health, stats, and metrics
//!   endpoints
//!
//! Graceful shutdown via `CancellationToken`; Prometheus metrics via the
//! `metrics` facade.

#![deny(unsafe_code)]

pub mod auth;
pub mod bridge;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod socket;
pub mod stream;
pub mod transport;

pub use auth::{Authenticator, StaticTokenAuthenticator, TokenValidation};
pub use config::GatewayConfig;
pub use error::ConnectError;
pub use server::{AppState, GatewayServer};
