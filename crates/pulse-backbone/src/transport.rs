//! Transport seam over the shared pub/sub store.
//!
//! The store contract is minimal: publish a payload to a topic string, and
//! subscribe to a topic pattern yielding `(topic, payload)` messages,
//! at-least-once, with no ordering guarantee across topics.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio_stream::wrappers::BroadcastStream;

use crate::error::BackboneError;

/// One message received from the backbone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackboneMessage {
    /// Topic the message was published to.
    pub topic: String,
    /// Serialized event payload.
    pub payload: String,
}

/// Stream of backbone messages. Ends when the underlying subscription
/// dies; the bus resubscribes with backoff.
pub type BackboneStream = BoxStream<'static, BackboneMessage>;

/// Publish/subscribe primitive keyed by topic string.
#[async_trait]
pub trait BackboneTransport: Send + Sync {
    /// Hand a payload to the store. Returns once handed off, not once
    /// delivered — remote delivery is best-effort.
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BackboneError>;

    /// Subscribe to every topic matching `pattern` (glob with a trailing
    /// `*` only).
    async fn subscribe(&self, pattern: &str) -> Result<BackboneStream, BackboneError>;
}

/// Whether a topic matches a pattern (exact, or prefix with trailing `*`).
#[must_use]
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => topic.starts_with(prefix),
        None => topic == pattern,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryTransport
// ─────────────────────────────────────────────────────────────────────────────

/// In-process transport backed by a `tokio::sync::broadcast` channel.
///
/// Used in tests and single-process deployments where the bus still
/// provides the uniform dispatch path but no external store exists.
#[derive(Clone, Debug)]
pub struct MemoryTransport {
    sender: tokio::sync::broadcast::Sender<BackboneMessage>,
}

impl MemoryTransport {
    /// Create a transport with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl BackboneTransport for MemoryTransport {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BackboneError> {
        // A send error only means no subscriber is currently attached,
        // which is fine for fire-and-forget fan-out.
        let _ = self.sender.send(BackboneMessage {
            topic: topic.to_owned(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<BackboneStream, BackboneError> {
        let pattern = pattern.to_owned();
        let stream = BroadcastStream::new(self.sender.subscribe())
            .filter_map(move |msg| {
                let pattern = pattern.clone();
                async move {
                    match msg {
                        Ok(m) if topic_matches(&pattern, &m.topic) => Some(m),
                        Ok(_) => None,
                        Err(err) => {
                            tracing::warn!(error = %err, "memory backbone receiver lagged");
                            None
                        }
                    }
                }
            })
            .boxed();
        Ok(stream)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
