//! One-way streaming transport: per-connection queues, heartbeat frames,
//! and the streaming connection manager.

pub mod frame;
pub mod manager;

pub use frame::StreamFrame;
pub use manager::{SseConnection, SseManager, StreamStats};
