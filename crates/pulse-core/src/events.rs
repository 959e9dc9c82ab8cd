//! Event kinds and the immutable unit of fan-out data.
//!
//! An [`Event`] is constructed once by a producer (metrics collector, LLM
//! agent, alerting rule, admin console) and then serialized independently
//! to every subscriber. Events are never owned by a connection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─────────────────────────────────────────────────────────────────────────────
// EventKind
// ─────────────────────────────────────────────────────────────────────────────

/// Closed enumeration of event kinds distributed through Pulse.
///
/// Wire names use the dotted `family.action` convention.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Per-user metrics tick.
    #[serde(rename = "metrics.user_update")]
    MetricsUserUpdate,
    /// Organization-wide metrics rollup.
    #[serde(rename = "metrics.org_update")]
    MetricsOrgUpdate,
    /// Periodic system health snapshot.
    #[serde(rename = "system.health")]
    SystemHealth,
    /// Alerting rule fired.
    #[serde(rename = "system.alert")]
    SystemAlert,
    /// Incremental LLM response token chunk.
    #[serde(rename = "llm.stream_chunk")]
    LlmStreamChunk,
    /// LLM response stream completed.
    #[serde(rename = "llm.stream_end")]
    LlmStreamEnd,
    /// Administrative command issued to clients.
    #[serde(rename = "admin.command")]
    AdminCommand,
    /// Administrative broadcast (announcement) to an organization.
    #[serde(rename = "admin.broadcast")]
    AdminBroadcast,
    /// Connection lifecycle notification.
    #[serde(rename = "connection.status")]
    ConnectionStatus,
}

impl EventKind {
    /// Every kind, in declaration order. Used by the backbone bridge to
    /// register one listener per kind.
    pub const ALL: [EventKind; 9] = [
        EventKind::MetricsUserUpdate,
        EventKind::MetricsOrgUpdate,
        EventKind::SystemHealth,
        EventKind::SystemAlert,
        EventKind::LlmStreamChunk,
        EventKind::LlmStreamEnd,
        EventKind::AdminCommand,
        EventKind::AdminBroadcast,
        EventKind::ConnectionStatus,
    ];

    /// The dotted wire name for this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MetricsUserUpdate => "metrics.user_update",
            Self::MetricsOrgUpdate => "metrics.org_update",
            Self::SystemHealth => "system.health",
            Self::SystemAlert => "system.alert",
            Self::LlmStreamChunk => "llm.stream_chunk",
            Self::LlmStreamEnd => "llm.stream_end",
            Self::AdminCommand => "admin.command",
            Self::AdminBroadcast => "admin.broadcast",
            Self::ConnectionStatus => "connection.status",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event
// ─────────────────────────────────────────────────────────────────────────────

/// One unit of fan-out data.
///
/// Immutable once constructed. The optional `channel` names the exact
/// channel a targeted publish was addressed to, so remote instances can
/// reproduce the same exact-match fan-out; organization-wide broadcasts
/// leave it unset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Owning tenant.
    pub organization_id: String,
    /// Target user for user-scoped events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Full name of the channel this event was published to, if targeted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Opaque structured payload.
    pub data: Value,
    /// Construction time.
    pub timestamp: DateTime<Utc>,
    /// Producing service identity (instance-unique).
    pub source: String,
    /// Echo of a client-issued message id, for request/response pairing
    /// and stream resume.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Event {
    /// Construct an event stamped with the current time.
    #[must_use]
    pub fn new(
        kind: EventKind,
        organization_id: impl Into<String>,
        data: Value,
        source: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            organization_id: organization_id.into(),
            user_id: None,
            channel: None,
            data,
            timestamp: Utc::now(),
            source: source.into(),
            correlation_id: None,
        }
    }

    /// Target a specific user.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Address a specific channel (exact-match remote fan-out).
    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Attach a correlation id.
    #[must_use]
    pub fn with_correlation(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
