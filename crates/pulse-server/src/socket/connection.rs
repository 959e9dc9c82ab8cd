//! Per-connection socket state.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use pulse_core::{ConnectionId, ServerFrame};

use crate::transport::{SocketTransport, TransportError};

/// One connected bidirectional client.
///
/// Owned exclusively by the [`super::SocketManager`]; the channel registry
/// only ever holds the connection id. State mutations are short lock-free
/// or `parking_lot`-guarded sections, safe to touch from the reader loop,
/// the writer loop, and fan-out paths concurrently.
pub struct SocketConnection {
    /// Connection identity.
    pub id: ConnectionId,
    /// Owning tenant.
    pub organization_id: String,
    /// Connected user, if identified at upgrade time.
    pub user_id: Option<String>,
    /// When the connection was registered.
    pub created_at: DateTime<Utc>,
    /// Monotonic registration instant, for duration metrics.
    pub connected_at: Instant,
    transport: Arc<dyn SocketTransport>,
    roles: RwLock<HashSet<String>>,
    channels: Mutex<HashSet<String>>,
    authenticated: AtomicBool,
    /// Whether the client answered the last liveness ping.
    pub is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    last_activity: Mutex<DateTime<Utc>>,
    dropped_frames: AtomicU64,
    auth_cancel: CancellationToken,
}

impl std::fmt::Debug for SocketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketConnection")
            .field("id", &self.id)
            .field("organization_id", &self.organization_id)
            .field("user_id", &self.user_id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl SocketConnection {
    /// Create a new connection over the given transport.
    #[must_use]
    pub fn new(
        organization_id: impl Into<String>,
        user_id: Option<String>,
        roles: HashSet<String>,
        transport: Arc<dyn SocketTransport>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            organization_id: organization_id.into(),
            user_id,
            created_at: Utc::now(),
            connected_at: now,
            transport,
            roles: RwLock::new(roles),
            channels: Mutex::new(HashSet::new()),
            authenticated: AtomicBool::new(false),
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            last_activity: Mutex::new(Utc::now()),
            dropped_frames: AtomicU64::new(0),
            auth_cancel: CancellationToken::new(),
        }
    }

    /// The outbound transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn SocketTransport> {
        &self.transport
    }

    /// Serialize and enqueue a frame.
    pub async fn send_frame(&self, frame: &ServerFrame) -> Result<(), TransportError> {
        self.send_raw(&frame.to_json()).await
    }

    /// Enqueue pre-serialized frame text (shared across fan-out targets).
    pub async fn send_raw(&self, text: &str) -> Result<(), TransportError> {
        let result = self.transport.send_text(text).await;
        if result.is_err() {
            let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Frames that failed to enqueue over the connection's lifetime.
    #[must_use]
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Whether the authentication handshake has completed.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Relaxed)
    }

    /// Flip to authenticated. Returns `false` if it already was — the
    /// caller increments the authenticated counter exactly once.
    pub fn set_authenticated(&self) -> bool {
        !self.authenticated.swap(true, Ordering::Relaxed)
    }

    /// Current role set.
    #[must_use]
    pub fn roles(&self) -> HashSet<String> {
        self.roles.read().clone()
    }

    /// Merge roles granted by token validation into the connection.
    pub fn merge_roles(&self, granted: HashSet<String>) {
        self.roles.write().extend(granted);
    }

    /// Channels this connection is subscribed to.
    #[must_use]
    pub fn subscribed_channels(&self) -> HashSet<String> {
        self.channels.lock().clone()
    }

    /// Record new subscriptions.
    pub fn add_channels(&self, names: &[String]) {
        let mut channels = self.channels.lock();
        for name in names {
            let _ = channels.insert(name.clone());
        }
    }

    /// Remove subscriptions.
    pub fn remove_channels(&self, names: &[String]) {
        let mut channels = self.channels.lock();
        for name in names {
            let _ = channels.remove(name);
        }
    }

    /// Token cancelled when authentication completes or the connection
    /// dies, stopping the auth-timeout timer.
    #[must_use]
    pub fn auth_cancel(&self) -> &CancellationToken {
        &self.auth_cancel
    }

    /// Mark the connection alive (pong or any inbound activity).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Check and reset the alive flag; returns whether the client was
    /// alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Duration since the last pong (or connection establishment).
    #[must_use]
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Record inbound activity time.
    pub fn touch(&self) {
        *self.last_activity.lock() = Utc::now();
    }

    /// Last inbound activity time.
    #[must_use]
    pub fn last_activity_at(&self) -> DateTime<Utc> {
        *self.last_activity.lock()
    }

    /// Connection age.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
