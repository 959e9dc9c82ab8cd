//! # pulse-backbone
//!
//! Cross-process publish/subscribe bridge. An event published on any
//! process instance reaches subscribers connected to every other instance
//! holding matching local connections.
//!
//! The [`EventBus`] owns a background dispatcher loop that receives
//! backbone messages and forwards them to registered listeners — the same
//! path for locally and remotely originated events. The shared store is
//! abstracted behind [`BackboneTransport`]: [`RedisTransport`] for
//! deployments, [`MemoryTransport`] for tests and single-process setups.
//!
//! Delivery is at-least-once with no cross-topic ordering guarantee.
//! While the backbone is down, publishes fail with
//! [`BackboneError::Unavailable`] and callers degrade to local-only
//! delivery; nothing is queued for redelivery.

#![deny(unsafe_code)]

pub mod bus;
pub mod error;
pub mod redis;
pub mod transport;

pub use bus::{BusState, EventBus, organization_topic, EVENTS_PATTERN};
pub use error::BackboneError;
pub use redis::RedisTransport;
pub use transport::{BackboneMessage, BackboneStream, BackboneTransport, MemoryTransport};
