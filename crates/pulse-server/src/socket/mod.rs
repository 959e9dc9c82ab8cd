//! Bidirectional socket transport: connection state, authentication
//! handshake, inbound command dispatch, and outbound push.

pub mod connection;
pub mod manager;

pub use connection::SocketConnection;
pub use manager::{CommandHandler, SocketManager, SocketStats};
