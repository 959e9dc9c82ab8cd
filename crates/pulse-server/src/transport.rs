//! Socket transport seam.
//!
//! The socket manager never touches a raw WebSocket: it talks to a
//! [`SocketTransport`], which the route layer implements over a buffered
//! outbound queue ([`ChannelTransport`]) and tests implement with mocks.
//! Sends never block — a full queue is a slow-client signal, and queue
//! failure converts to connection death at the manager.

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use pulse_core::CloseReason;

/// Outbound transport failure.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The per-connection outbound queue is full (slow client).
    #[error("outbound queue full")]
    QueueFull,
    /// The transport has been closed.
    #[error("transport closed")]
    Closed,
}

/// Outbound half of one bidirectional connection.
#[async_trait]
pub trait SocketTransport: Send + Sync {
    /// Enqueue a text frame. Must not block.
    async fn send_text(&self, text: &str) -> Result<(), TransportError>;

    /// Close the transport with a reason. Idempotent; the first reason wins.
    async fn close(&self, reason: CloseReason);
}

/// [`SocketTransport`] over an mpsc queue drained by the connection's
/// writer task. Closing cancels the close signal that both the writer and
/// reader loops select on.
pub struct ChannelTransport {
    tx: mpsc::Sender<String>,
    closed: CancellationToken,
    close_reason: Mutex<Option<CloseReason>>,
}

impl ChannelTransport {
    /// Wrap the sending half of a connection's outbound queue.
    #[must_use]
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self {
            tx,
            closed: CancellationToken::new(),
            close_reason: Mutex::new(None),
        }
    }

    /// Token cancelled when the transport closes.
    #[must_use]
    pub fn close_signal(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// The reason the transport was closed with, if any.
    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }
}

#[async_trait]
impl SocketTransport for ChannelTransport {
    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.tx.try_send(text.to_owned()).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => TransportError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    async fn close(&self, reason: CloseReason) {
        {
            let mut slot = self.close_reason.lock();
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.closed.cancel();
    }
}
