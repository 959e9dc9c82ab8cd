//! Socket connection manager.
//!
//! Everything the streaming manager does plus the authentication
//! handshake and inbound command dispatch. Per-connection lifecycle:
//! `connected (unauthenticated) → authenticated → closing → closed`, with
//! a quota check at connect and a hard auth timeout.
//!
//! The per-organization connection counter is updated atomically alongside
//! registration/removal, so the quota check-then-act cannot race past the
//! limit under concurrent connects.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use pulse_backbone::{BackboneError, EventBus};
use pulse_channels::ChannelRegistry;
use pulse_core::{
    ClientEnvelope, CloseReason, CommandKind, ConnectionId, Event, EventKind, ServerFrame,
};
use pulse_core::envelope::{AuthenticatePayload, CommandPayload, SubscribePayload};

use crate::auth::Authenticator;
use crate::config::GatewayConfig;
use crate::error::ConnectError;
use crate::metrics as metric_names;
use crate::socket::connection::SocketConnection;
use crate::transport::{SocketTransport, TransportError};

/// Maximum lifetime frame drops before a slow client is evicted.
const MAX_TOTAL_DROPS: u64 = 100;

/// Read-only connection statistics.
#[derive(Clone, Debug, Serialize)]
pub struct SocketStats {
    /// Total live socket connections.
    pub total_connections: usize,
    /// Connections that completed the auth handshake.
    pub authenticated_connections: usize,
}

/// Domain-specific command collaborator. The manager is transport and
/// session plumbing; admin/control business logic lives behind this trait.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Execute a command for an authenticated connection, returning the
    /// reply payload or an error message.
    async fn handle(
        &self,
        connection: &SocketConnection,
        name: &str,
        args: Value,
    ) -> Result<Value, String>;
}

/// Manages long-lived bidirectional client connections.
pub struct SocketManager {
    /// Self-reference handed to spawned timers (auth timeout).
    weak: Weak<Self>,
    registry: Arc<ChannelRegistry>,
    bus: Arc<EventBus>,
    authenticator: Arc<dyn Authenticator>,
    command_handler: parking_lot::RwLock<Option<Arc<dyn CommandHandler>>>,
    source: String,
    max_connections_per_org: usize,
    auth_timeout: Duration,
    connections: RwLock<HashMap<ConnectionId, Arc<SocketConnection>>>,
    channel_index: RwLock<HashMap<String, HashSet<ConnectionId>>>,
    org_index: RwLock<HashMap<String, HashSet<ConnectionId>>>,
    org_counters: DashMap<String, Arc<AtomicUsize>>,
    authenticated_count: AtomicUsize,
}

impl SocketManager {
    /// Create a manager. `source` is this instance's identity and stamps
    /// every event published through it.
    pub fn new(
        registry: Arc<ChannelRegistry>,
        bus: Arc<EventBus>,
        authenticator: Arc<dyn Authenticator>,
        config: &GatewayConfig,
        source: impl Into<String>,
    ) -> Arc<Self> {
        let source = source.into();
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            registry,
            bus,
            authenticator,
            command_handler: parking_lot::RwLock::new(None),
            source,
            max_connections_per_org: config.max_connections_per_org,
            auth_timeout: config.auth_timeout(),
            connections: RwLock::new(HashMap::new()),
            channel_index: RwLock::new(HashMap::new()),
            org_index: RwLock::new(HashMap::new()),
            org_counters: DashMap::new(),
            authenticated_count: AtomicUsize::new(0),
        })
    }

    /// Install the domain command collaborator.
    pub fn set_command_handler(&self, handler: Arc<dyn CommandHandler>) {
        *self.command_handler.write() = Some(handler);
    }

    /// Register a new connection over `transport`.
    ///
    /// Performs the quota check, sends the initial `success` frame, and
    /// arms the auth-timeout timer. A connection rejected by quota is
    /// closed with [`CloseReason::CapacityExceeded`] without ever
    /// entering the authenticated state.
    #[instrument(skip_all, fields(organization_id = %organization_id))]
    pub async fn connect(
        &self,
        transport: Arc<dyn SocketTransport>,
        organization_id: &str,
        user_id: Option<&str>,
        roles: HashSet<String>,
    ) -> Result<Arc<SocketConnection>, ConnectError> {
        if organization_id.is_empty() {
            return Err(ConnectError::InvalidOrganization);
        }
        let _ = self.registry.create_default_channels(organization_id)?;

        let quota = {
            let entry = self
                .org_counters
                .entry(organization_id.to_owned())
                .or_default();
            Arc::clone(entry.value())
        };
        let admitted = quota
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max_connections_per_org).then(|| n + 1)
            })
            .is_ok();
        if !admitted {
            counter!(metric_names::WS_QUOTA_REJECTIONS_TOTAL).increment(1);
            warn!(organization_id, limit = self.max_connections_per_org, "connection quota full");
            transport.close(CloseReason::CapacityExceeded).await;
            return Err(ConnectError::CapacityExceeded {
                organization_id: organization_id.to_owned(),
                limit: self.max_connections_per_org,
            });
        }

        let connection = Arc::new(SocketConnection::new(
            organization_id,
            user_id.map(str::to_owned),
            roles,
            transport,
        ));
        {
            let mut connections = self.connections.write().await;
            let _ = connections.insert(connection.id.clone(), connection.clone());
        }
        {
            let mut orgs = self.org_index.write().await;
            let _ = orgs
                .entry(connection.organization_id.clone())
                .or_default()
                .insert(connection.id.clone());
        }

        if connection
            .send_frame(&ServerFrame::success("Connected"))
            .await
            .is_err()
        {
            self.disconnect(&connection.id, Some(CloseReason::TransportError))
                .await;
            return Err(ConnectError::TransportFailed);
        }

        // Arm the auth timer; cancelled by authenticate() or disconnect().
        let manager = self.weak.clone();
        let id = connection.id.clone();
        let cancel = connection.auth_cancel().clone();
        let auth_timeout = self.auth_timeout;
        drop(tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(auth_timeout) => {
                    if let Some(manager) = manager.upgrade() {
                        manager.expire_unauthenticated(&id).await;
                    }
                }
            }
        }));

        counter!(metric_names::WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(metric_names::WS_CONNECTIONS_ACTIVE).increment(1.0);
        debug!(connection_id = %connection.id, "socket connected");
        Ok(connection)
    }

    /// Force-close a connection whose auth window expired.
    async fn expire_unauthenticated(&self, connection_id: &ConnectionId) {
        let Some(connection) = self.get(connection_id).await else {
            return;
        };
        if connection.is_authenticated() {
            return;
        }
        warn!(connection_id = %connection_id, "authentication timed out");
        let _ = connection
            .send_frame(&ServerFrame::error(
                "AUTH_TIMEOUT",
                "authentication not completed in time",
            ))
            .await;
        self.disconnect(connection_id, Some(CloseReason::AuthTimeout))
            .await;
    }

    /// Validate a token for a connection.
    ///
    /// Success flips the connection to authenticated, merges granted
    /// roles, cancels the auth timer, and confirms with a `success`
    /// frame. Failure closes the connection with
    /// [`CloseReason::AuthFailed`].
    #[instrument(skip(self, token))]
    pub async fn authenticate(&self, connection_id: &ConnectionId, token: &str) -> bool {
        let Some(connection) = self.get(connection_id).await else {
            return false;
        };

        let verdict = self.authenticator.validate(token).await;
        if !verdict.valid {
            warn!(connection_id = %connection_id, "token validation failed");
            let _ = connection
                .send_frame(&ServerFrame::error("AUTH_FAILED", "invalid token"))
                .await;
            self.disconnect(connection_id, Some(CloseReason::AuthFailed))
                .await;
            return false;
        }

        connection.merge_roles(verdict.roles);
        if connection.set_authenticated() {
            let _ = self.authenticated_count.fetch_add(1, Ordering::SeqCst);
        }
        connection.auth_cancel().cancel();

        if connection
            .send_frame(&ServerFrame::success("Authenticated"))
            .await
            .is_err()
        {
            self.disconnect(connection_id, Some(CloseReason::TransportError))
                .await;
            return false;
        }
        debug!(connection_id = %connection_id, "socket authenticated");
        true
    }

    /// Parse and dispatch one inbound message.
    ///
    /// Malformed input never kills the connection — the client gets an
    /// `error` frame. Before authentication only `ping` and
    /// `authenticate` are accepted.
    #[instrument(skip(self, raw))]
    pub async fn handle_message(&self, connection_id: &ConnectionId, raw: &str) {
        let Some(connection) = self.get(connection_id).await else {
            debug!(connection_id = %connection_id, "message for unknown connection dropped");
            return;
        };
        connection.touch();

        let envelope = match ClientEnvelope::parse(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(error = %err, "malformed inbound message");
                self.send_or_disconnect(
                    &connection,
                    ServerFrame::error("MALFORMED_MESSAGE", "invalid message envelope"),
                )
                .await;
                return;
            }
        };
        let correlation = envelope.message_id.clone();
        let command = envelope.command();

        if !connection.is_authenticated() && !command.allowed_before_auth() {
            self.send_or_disconnect(
                &connection,
                ServerFrame::error("NOT_AUTHENTICATED", "authenticate before issuing commands")
                    .with_correlation(correlation),
            )
            .await;
            return;
        }

        match command {
            CommandKind::Ping => {
                connection.mark_alive();
                self.send_or_disconnect(
                    &connection,
                    ServerFrame::pong().with_correlation(correlation),
                )
                .await;
            }
            CommandKind::Authenticate => {
                match serde_json::from_value::<AuthenticatePayload>(envelope.data) {
                    Ok(payload) => {
                        let _ = self.authenticate(connection_id, &payload.token).await;
                    }
                    Err(_) => {
                        self.send_or_disconnect(
                            &connection,
                            ServerFrame::error("MALFORMED_MESSAGE", "authenticate requires a token")
                                .with_correlation(correlation),
                        )
                        .await;
                    }
                }
            }
            CommandKind::Subscribe => {
                match serde_json::from_value::<SubscribePayload>(envelope.data) {
                    Ok(payload) => {
                        self.subscribe(&connection, &payload.channels, correlation)
                            .await;
                    }
                    Err(_) => {
                        self.send_or_disconnect(
                            &connection,
                            ServerFrame::error("MALFORMED_MESSAGE", "subscribe requires channels")
                                .with_correlation(correlation),
                        )
                        .await;
                    }
                }
            }
            CommandKind::Unsubscribe => {
                match serde_json::from_value::<SubscribePayload>(envelope.data) {
                    Ok(payload) => {
                        self.unsubscribe(&connection, &payload.channels, correlation)
                            .await;
                    }
                    Err(_) => {
                        self.send_or_disconnect(
                            &connection,
                            ServerFrame::error("MALFORMED_MESSAGE", "unsubscribe requires channels")
                                .with_correlation(correlation),
                        )
                        .await;
                    }
                }
            }
            CommandKind::Command => {
                match serde_json::from_value::<CommandPayload>(envelope.data) {
                    Ok(payload) => {
                        self.run_command(&connection, payload, correlation).await;
                    }
                    Err(_) => {
                        self.send_or_disconnect(
                            &connection,
                            ServerFrame::error("MALFORMED_MESSAGE", "command requires a name")
                                .with_correlation(correlation),
                        )
                        .await;
                    }
                }
            }
            CommandKind::Unknown => {
                self.send_or_disconnect(
                    &connection,
                    ServerFrame::error(
                        "UNKNOWN_MESSAGE_TYPE",
                        &format!("unrecognized message type '{}'", envelope.kind),
                    )
                    .with_correlation(correlation),
                )
                .await;
            }
        }
    }

    /// Apply a subscribe request: ACL partition, index update, reply.
    async fn subscribe(
        &self,
        connection: &Arc<SocketConnection>,
        requested: &[String],
        correlation: Option<String>,
    ) {
        let roles = connection.roles();
        let user = connection.user_id.as_deref();
        let mut subscribed = Vec::new();
        let mut denied = Vec::new();
        for name in requested {
            match self.registry.authorize_subscription(
                name,
                &connection.organization_id,
                user,
                Some(&roles),
            ) {
                Some(full_name) => subscribed.push(full_name),
                None => denied.push(name.clone()),
            }
        }

        if let Some(user) = user {
            let _ = self.registry.subscribe_user(
                &connection.organization_id,
                user,
                Some(&roles),
                &subscribed,
            );
        }
        {
            let mut index = self.channel_index.write().await;
            for full_name in &subscribed {
                let _ = index
                    .entry(full_name.clone())
                    .or_default()
                    .insert(connection.id.clone());
            }
        }
        connection.add_channels(&subscribed);

        self.send_or_disconnect(
            connection,
            ServerFrame::subscription(&subscribed, &denied).with_correlation(correlation),
        )
        .await;
    }

    /// Apply an unsubscribe request and reply with what was removed.
    async fn unsubscribe(
        &self,
        connection: &Arc<SocketConnection>,
        requested: &[String],
        correlation: Option<String>,
    ) {
        let current = connection.subscribed_channels();
        let removed: Vec<String> = requested
            .iter()
            .filter(|name| current.contains(*name))
            .cloned()
            .collect();

        {
            let mut index = self.channel_index.write().await;
            for name in &removed {
                if let Some(ids) = index.get_mut(name) {
                    let _ = ids.remove(&connection.id);
                    if ids.is_empty() {
                        let _ = index.remove(name);
                    }
                }
            }
        }
        connection.remove_channels(&removed);
        if let Some(user) = connection.user_id.as_deref() {
            let _ = self
                .registry
                .unsubscribe_user(&connection.organization_id, user, &removed);
        }

        self.send_or_disconnect(
            connection,
            ServerFrame::new("unsubscribed", json!({ "channels": removed }))
                .with_correlation(correlation),
        )
        .await;
    }

    /// Route a domain command to the external collaborator.
    async fn run_command(
        &self,
        connection: &Arc<SocketConnection>,
        payload: CommandPayload,
        correlation: Option<String>,
    ) {
        let handler = self.command_handler.read().clone();
        let frame = match handler {
            None => ServerFrame::error("UNSUPPORTED_COMMAND", "no command handler configured"),
            Some(handler) => {
                match handler.handle(connection, &payload.name, payload.args).await {
                    Ok(result) => ServerFrame::new("command_result", result),
                    Err(message) => ServerFrame::error("COMMAND_FAILED", &message),
                }
            }
        };
        self.send_or_disconnect(connection, frame.with_correlation(correlation))
            .await;
    }

    /// Publish an event to one channel (plus remote instances).
    #[instrument(skip_all, fields(channel = %channel))]
    pub async fn publish(&self, channel: &str, kind: EventKind, data: Value, id: Option<String>) {
        let Some(channel_entry) = self
            .registry
            .channel(channel)
            .or_else(|| self.registry.ensure_from_full_name(channel))
        else {
            warn!(channel, "publish to unresolvable channel dropped");
            return;
        };

        let mut event = Event::new(
            kind,
            channel_entry.organization_id(),
            data,
            self.source.clone(),
        )
        .with_channel(channel);
        if let Some(id) = id {
            event = event.with_correlation(id);
        }
        counter!(metric_names::EVENTS_PUBLISHED_TOTAL, "transport" => "socket").increment(1);
        self.relay_or_deliver(event).await;
    }

    /// Publish to every local connection of an organization, plus remote
    /// instances.
    #[instrument(skip_all, fields(organization_id = %organization_id))]
    pub async fn publish_to_organization(
        &self,
        organization_id: &str,
        kind: EventKind,
        data: Value,
    ) {
        let event = Event::new(kind, organization_id, data, self.source.clone());
        counter!(metric_names::EVENTS_PUBLISHED_TOTAL, "transport" => "socket").increment(1);
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

    /// Deliver one event to matching local connections. Unauthenticated
    /// connections never receive fan-out frames — pre-auth traffic is
    /// limited to the handshake itself.
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

        let text = ServerFrame::event(event).to_json();
        let mut delivered = 0;
        let mut to_disconnect: Vec<(ConnectionId, CloseReason)> = Vec::new();
        {
            let connections = self.connections.read().await;
            for id in &targets {
                let Some(connection) = connections.get(id) else {
                    continue;
                };
                if !connection.is_authenticated() {
                    continue;
                }
                match connection.send_raw(&text).await {
                    Ok(()) => delivered += 1,
                    Err(TransportError::Closed) => {
                        to_disconnect.push((id.clone(), CloseReason::TransportError));
                    }
                    Err(TransportError::QueueFull) => {
                        counter!(metric_names::WS_DROPPED_FRAMES_TOTAL).increment(1);
                        if connection.drop_count() >= MAX_TOTAL_DROPS {
                            warn!(connection_id = %id, "evicting slow socket client");
                            to_disconnect.push((id.clone(), CloseReason::TransportError));
                        }
                    }
                }
            }
        }
        for (id, reason) in to_disconnect {
            self.disconnect(&id, Some(reason)).await;
        }
        delivered
    }

    /// Close the transport and remove the connection from every index.
    /// Idempotent: unknown ids are a no-op and counters are decremented
    /// at most once.
    pub async fn disconnect(&self, connection_id: &ConnectionId, reason: Option<CloseReason>) {
        let connection = {
            let mut connections = self.connections.write().await;
            connections.remove(connection_id)
        };
        let Some(connection) = connection else {
            return;
        };

        connection.auth_cancel().cancel();

        let channels: Vec<String> = connection.subscribed_channels().into_iter().collect();
        {
            let mut index = self.channel_index.write().await;
            for channel in &channels {
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
            if let Some(ids) = orgs.get_mut(&connection.organization_id) {
                let _ = ids.remove(connection_id);
                if ids.is_empty() {
                    let _ = orgs.remove(&connection.organization_id);
                }
            }
        }
        if let Some(user) = connection.user_id.as_deref() {
            let _ = self
                .registry
                .unsubscribe_user(&connection.organization_id, user, &channels);
        }

        if let Some(quota) = self.org_counters.get(&connection.organization_id) {
            let _ = quota.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        }
        if connection.is_authenticated() {
            let _ = self
                .authenticated_count
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        }

        let reason = reason.unwrap_or(CloseReason::ClientRequest);
        connection.transport().close(reason).await;

        counter!(metric_names::WS_DISCONNECTIONS_TOTAL).increment(1);
        gauge!(metric_names::WS_CONNECTIONS_ACTIVE).decrement(1.0);
        histogram!(metric_names::WS_CONNECTION_DURATION_SECONDS)
            .record(connection.age().as_secs_f64());
        debug!(connection_id = %connection_id, %reason, "socket disconnected");
    }

    /// Disconnect every connection (server shutdown).
    pub async fn disconnect_all(&self, reason: CloseReason) {
        let ids: Vec<ConnectionId> = {
            let connections = self.connections.read().await;
            connections.keys().cloned().collect()
        };
        for id in ids {
            self.disconnect(&id, Some(reason)).await;
        }
    }

    /// Non-authoritative snapshot for operational dashboards.
    pub async fn get_connection_stats(&self) -> SocketStats {
        SocketStats {
            total_connections: self.connections.read().await.len(),
            authenticated_connections: self.authenticated_count.load(Ordering::SeqCst),
        }
    }

    /// Number of local subscribers on a channel (test/ops visibility).
    pub async fn channel_subscribers(&self, channel: &str) -> usize {
        let index = self.channel_index.read().await;
        index.get(channel).map_or(0, HashSet::len)
    }

    /// Look up a live connection.
    pub async fn get(&self, connection_id: &ConnectionId) -> Option<Arc<SocketConnection>> {
        let connections = self.connections.read().await;
        connections.get(connection_id).cloned()
    }

    /// Send a frame, converting transport death into disconnect.
    async fn send_or_disconnect(&self, connection: &Arc<SocketConnection>, frame: ServerFrame) {
        if connection.send_frame(&frame).await == Err(TransportError::Closed) {
            self.disconnect(&connection.id, Some(CloseReason::TransportError))
                .await;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
