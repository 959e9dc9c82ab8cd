//! Streaming connection manager.
//!
//! Owns every one-way client connection: a global connection index plus
//! per-channel and per-organization subscriber indices. Each connection
//! has a bounded outbound queue drained by [`SseManager::stream`], an
//! explicit receive loop that emits a heartbeat frame after every
//! `heartbeat_interval` of inactivity.
//!
//! Index updates are short, non-blocking critical sections; no I/O happens
//! while an index lock is held (queue sends are `try_send`).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use metrics::{counter, gauge};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, instrument, warn};

use pulse_backbone::{BackboneError, EventBus};
use pulse_channels::ChannelRegistry;
use pulse_core::{ConnectionId, Event, EventKind};

use crate::config::GatewayConfig;
use crate::error::ConnectError;
use crate::metrics as metric_names;
use crate::stream::frame::StreamFrame;

/// Maximum lifetime frame drops before a slow client is evicted.
const MAX_TOTAL_DROPS: u64 = 100;

/// Public snapshot of one streaming connection.
#[derive(Clone, Debug, Serialize)]
pub struct SseConnection {
    /// Connection identity.
    pub connection_id: ConnectionId,
    /// Owning tenant.
    pub organization_id: String,
    /// Connected user, if identified.
    pub user_id: Option<String>,
    /// Channel full names this connection is subscribed to.
    pub channels: HashSet<String>,
    /// When the connection was registered.
    pub created_at: DateTime<Utc>,
}

/// Registry entry for one live connection.
struct StreamEntry {
    info: SseConnection,
    tx: mpsc::Sender<StreamFrame>,
    /// Taken by the first `stream()` call; a stream is restartable per
    /// connection, not per call.
    rx: Option<mpsc::Receiver<StreamFrame>>,
    dropped: AtomicU64,
}

/// Read-only connection statistics.
#[derive(Clone, Debug, Serialize)]
pub struct StreamStats {
    /// Total live streaming connections.
    pub total_connections: usize,
    /// Live connection count per organization.
    pub connections_by_org: HashMap<String, usize>,
}

/// Manages long-lived read-only client connections.
pub struct SseManager {
    registry: Arc<ChannelRegistry>,
    bus: Arc<EventBus>,
    source: String,
    heartbeat_interval: std::time::Duration,
    buffer: usize,
    connections: RwLock<HashMap<ConnectionId, StreamEntry>>,
    channel_index: RwLock<HashMap<String, HashSet<ConnectionId>>>,
    org_index: RwLock<HashMap<String, HashSet<ConnectionId>>>,
}

impl SseManager {
    /// Create a manager. `source` is this instance's identity and stamps
    /// every event published through it.
    pub fn new(
        registry: Arc<ChannelRegistry>,
        bus: Arc<EventBus>,
        config: &GatewayConfig,
        source: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            bus,
            source: source.into(),
            heartbeat_interval: config.heartbeat_interval(),
            buffer: config.outbound_buffer,
            connections: RwLock::new(HashMap::new()),
            channel_index: RwLock::new(HashMap::new()),
            org_index: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new connection.
    ///
    /// Each requested channel is validated against the ACL; channels
    /// failing the check are silently excluded — partial denial never
    /// fails the connect itself. The organization's default channel set
    /// is bootstrapped lazily on first contact.
    #[instrument(skip_all, fields(organization_id = %organization_id))]
    pub async fn connect(
        &self,
        organization_id: &str,
        user_id: Option<&str>,
        channels: &HashSet<String>,
    ) -> Result<SseConnection, ConnectError> {
        if organization_id.is_empty() {
            return Err(ConnectError::InvalidOrganization);
        }
        let _ = self.registry.create_default_channels(organization_id)?;

        let mut subscribed = HashSet::new();
        for requested in channels {
            match self
                .registry
                .authorize_subscription(requested, organization_id, user_id, None)
            {
                Some(full_name) => {
                    let _ = subscribed.insert(full_name);
                }
                None => {
                    debug!(channel = %requested, "channel excluded by ACL");
                }
            }
        }

        let (tx, rx) = mpsc::channel(self.buffer);
        let info = SseConnection {
            connection_id: ConnectionId::new(),
            organization_id: organization_id.to_owned(),
            user_id: user_id.map(str::to_owned),
            channels: subscribed,
            created_at: Utc::now(),
        };

        {
            let mut connections = self.connections.write().await;
            let _ = connections.insert(
                info.connection_id.clone(),
                StreamEntry {
                    info: info.clone(),
                    tx,
                    rx: Some(rx),
                    dropped: AtomicU64::new(0),
                },
            );
        }
        {
            let mut index = self.channel_index.write().await;
            for channel in &info.channels {
                let _ = index
                    .entry(channel.clone())
                    .or_default()
                    .insert(info.connection_id.clone());
            }
        }
        {
            let mut orgs = self.org_index.write().await;
            let _ = orgs
                .entry(info.organization_id.clone())
                .or_default()
                .insert(info.connection_id.clone());
        }

        counter!(metric_names::SSE_CONNECTIONS_TOTAL).increment(1);
        gauge!(metric_names::SSE_CONNECTIONS_ACTIVE).increment(1.0);
        debug!(connection_id = %info.connection_id, channels = info.channels.len(), "stream connected");
        Ok(info)
    }

    /// Take the connection's outbound sequence: a logically infinite
    /// stream of frames ending only on disconnect.
    ///
    /// Each element is a heartbeat (after `heartbeat_interval` of
    /// inactivity) or a data frame carrying one event, in per-connection
    /// FIFO order.
    pub async fn stream(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<BoxStream<'static, StreamFrame>, ConnectError> {
        let mut rx = {
            let mut connections = self.connections.write().await;
            let entry = connections
                .get_mut(connection_id)
                .ok_or_else(|| ConnectError::UnknownConnection(connection_id.clone()))?;
            entry
                .rx
                .take()
                .ok_or_else(|| ConnectError::StreamConsumed(connection_id.clone()))?
        };

        let heartbeat = self.heartbeat_interval;
        Ok(async_stream::stream! {
            loop {
                match tokio::time::timeout(heartbeat, rx.recv()).await {
                    Err(_) => yield StreamFrame::Heartbeat,
                    Ok(Some(frame)) => yield frame,
                    Ok(None) => break,
                }
            }
        }
        .boxed())
    }

    /// Publish an event to one channel.
    ///
    /// Relays through the backbone so every instance (this one included)
    /// fans out along the same path. When the backbone is unavailable the
    /// event is delivered to local subscribers only — an at-most-once
    /// degradation for remote subscribers.
    #[instrument(skip_all, fields(channel = %channel))]
    pub async fn publish(
        &self,
        channel: &str,
        kind: EventKind,
        data: Value,
        id: Option<String>,
    ) {
        let Some(organization_id) = self.resolve_channel_org(channel) else {
            warn!(channel, "publish to unresolvable channel dropped");
            return;
        };

        let mut event = Event::new(kind, organization_id, data, self.source.clone())
            .with_channel(channel);
        if let Some(id) = id {
            event = event.with_correlation(id);
        }
        counter!(metric_names::EVENTS_PUBLISHED_TOTAL, "transport" => "sse").increment(1);
        self.relay_or_deliver(event).await;
    }

    /// Publish to every local connection of an organization, across all
    /// its subscribed channels, plus remote instances via the backbone.
    #[instrument(skip_all, fields(organization_id = %organization_id))]
    pub async fn publish_to_organization(
        &self,
        organization_id: &str,
        kind: EventKind,
        data: Value,
    ) {
        let event = Event::new(kind, organization_id, data, self.source.clone());
        counter!(metric_names::EVENTS_PUBLISHED_TOTAL, "transport" => "sse").increment(1);
        self.relay_or_deliver(event).await;
    }

    /// Hand the event to the backbone; fall back to local-only delivery
    /// while it is unavailable.
    async fn relay_or_deliver(&self, event: Event) {
        match self.bus.publish(&event).await {
            Ok(()) => {}
            Err(BackboneError::Unavailable) => {
                warn!(kind = %event.kind, "backbone unavailable, delivering to local subscribers only");
                counter!(metric_names::BACKBONE_PUBLISH_FAILURES_TOTAL).increment(1);
                let _ = self.deliver_local(&event).await;
            }
            Err(err) => {
                warn!(error = %err, kind = %event.kind, "backbone publish failed, delivering locally");
                counter!(metric_names::BACKBONE_PUBLISH_FAILURES_TOTAL).increment(1);
                let _ = self.deliver_local(&event).await;
            }
        }
    }

    /// Deliver one event to matching local connections. Returns the number
    /// of connections the frame was enqueued for.
    ///
    /// Targeted events (with a channel) fan out to that channel's
    /// subscriber index; broadcasts fan out to every connection of the
    /// organization.
    pub async fn deliver_local(&self, event: &Event) -> usize {
        let targets: Vec<ConnectionId> = match &event.channel {
            Some(channel) => {
                let index = self.channel_index.read().await;
                index
                    .get(channel)
                    .map(|ids| ids.iter().cloned().collect())
                    .unwrap_or_default()
            }
            None => {
                let orgs = self.org_index.read().await;
                orgs.get(&event.organization_id)
                    .map(|ids| ids.iter().cloned().collect())
                    .unwrap_or_default()
            }
        };
        if targets.is_empty() {
            return 0;
        }

        let frame = StreamFrame::from_event(event);
        let mut delivered = 0;
        let mut to_evict = Vec::new();
        {
            let connections = self.connections.read().await;
            for id in &targets {
                let Some(entry) = connections.get(id) else {
                    continue;
                };
                if entry.tx.try_send(frame.clone()).is_ok() {
                    delivered += 1;
                } else {
                    counter!(metric_names::SSE_DROPPED_FRAMES_TOTAL).increment(1);
                    let drops = entry.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    if drops >= MAX_TOTAL_DROPS {
                        warn!(connection_id = %id, drops, "evicting slow streaming client");
                        to_evict.push(id.clone());
                    }
                }
            }
        }
        for id in to_evict {
            self.disconnect(&id).await;
        }
        delivered
    }

    /// Remove a connection from every index. Idempotent: unknown ids are
    /// a no-op. Dropping the queue sender ends the connection's stream.
    pub async fn disconnect(&self, connection_id: &ConnectionId) {
        let entry = {
            let mut connections = self.connections.write().await;
            connections.remove(connection_id)
        };
        let Some(entry) = entry else {
            return;
        };

        {
            let mut index = self.channel_index.write().await;
            for channel in &entry.info.channels {
                if let Some(ids) = index.get_mut(channel) {
                    let _ = ids.remove(connection_id);
                    if ids.is_empty() {
                        let _ = index.remove(channel);
                    }
                }
            }
        }
        {
            let mut orgs = self.org_index.write().await;
            if let Some(ids) = orgs.get_mut(&entry.info.organization_id) {
                let _ = ids.remove(connection_id);
                if ids.is_empty() {
                    let _ = orgs.remove(&entry.info.organization_id);
                }
            }
        }

        gauge!(metric_names::SSE_CONNECTIONS_ACTIVE).decrement(1.0);
        debug!(connection_id = %connection_id, "stream disconnected");
    }

    /// Disconnect every connection (server shutdown).
    pub async fn disconnect_all(&self) {
        let ids: Vec<ConnectionId> = {
            let connections = self.connections.read().await;
            connections.keys().cloned().collect()
        };
        for id in ids {
            self.disconnect(&id).await;
        }
    }

    /// Non-authoritative snapshot for operational dashboards.
    pub async fn get_connection_stats(&self) -> StreamStats {
        let total_connections = self.connections.read().await.len();
        let connections_by_org = {
            let orgs = self.org_index.read().await;
            orgs.iter()
                .map(|(org, ids)| (org.clone(), ids.len()))
                .collect()
        };
        StreamStats {
            total_connections,
            connections_by_org,
        }
    }

    /// Number of local subscribers on a channel (test/ops visibility).
    pub async fn channel_subscribers(&self, channel: &str) -> usize {
        let index = self.channel_index.read().await;
        index.get(channel).map_or(0, HashSet::len)
    }

    /// Organization owning a channel full name, from the registry or, for
    /// not-yet-registered names, lazily created from the name structure.
    fn resolve_channel_org(&self, full_name: &str) -> Option<String> {
        if let Some(channel) = self.registry.channel(full_name) {
            return Some(channel.organization_id().to_owned());
        }
        self.registry
            .ensure_from_full_name(full_name)
            .map(|channel| channel.organization_id().to_owned())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
