//! Transport-agnostic JSON wire envelope.
//!
//! Inbound client messages are `{ "type", "data", "timestamp", "message_id" }`.
//! Server-to-client frames echo a client `message_id` as `correlation_id`.
//! The envelope is parsed in two stages: the outer [`ClientEnvelope`] first,
//! then the `data` payload per [`CommandKind`] — unknown kinds fall through
//! to [`CommandKind::Unknown`] and are answered with an `error` frame rather
//! than killing the connection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::events::Event;

// ─────────────────────────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────────────────────────

/// Raw inbound message envelope.
#[derive(Clone, Debug, Deserialize)]
pub struct ClientEnvelope {
    /// Message kind discriminator.
    #[serde(rename = "type")]
    pub kind: String,
    /// Kind-specific payload.
    #[serde(default)]
    pub data: Value,
    /// Client-side send time (informational only).
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Client-issued id echoed back as `correlation_id`.
    #[serde(default)]
    pub message_id: Option<String>,
}

impl ClientEnvelope {
    /// Parse an envelope from raw JSON text.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// The resolved command kind for dispatch.
    #[must_use]
    pub fn command(&self) -> CommandKind {
        CommandKind::from_name(&self.kind)
    }
}

/// Closed enumeration of inbound command kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandKind {
    /// Keep-alive probe; answered with `pong`.
    Ping,
    /// Authentication handshake carrying a token.
    Authenticate,
    /// Channel subscription request.
    Subscribe,
    /// Channel unsubscription request.
    Unsubscribe,
    /// Domain-specific command routed to an external handler.
    Command,
    /// Anything else; answered with an `error` frame.
    Unknown,
}

impl CommandKind {
    /// Dispatch table from wire name to kind.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "ping" => Self::Ping,
            "authenticate" => Self::Authenticate,
            "subscribe" => Self::Subscribe,
            "unsubscribe" => Self::Unsubscribe,
            "command" => Self::Command,
            _ => Self::Unknown,
        }
    }

    /// Whether this command is accepted before authentication completes.
    #[must_use]
    pub fn allowed_before_auth(self) -> bool {
        matches!(self, Self::Ping | Self::Authenticate)
    }
}

/// Payload of a `subscribe` / `unsubscribe` command.
#[derive(Clone, Debug, Deserialize)]
pub struct SubscribePayload {
    /// Channel names (full or short form).
    #[serde(default)]
    pub channels: Vec<String>,
}

/// Payload of an `authenticate` command.
#[derive(Clone, Debug, Deserialize)]
pub struct AuthenticatePayload {
    /// Opaque bearer token.
    pub token: String,
}

/// Payload of a domain-specific `command`.
#[derive(Clone, Debug, Deserialize)]
pub struct CommandPayload {
    /// Command name.
    pub name: String,
    /// Command arguments.
    #[serde(default)]
    pub args: Value,
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────────────────────────

/// Server-to-client frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFrame {
    /// Frame kind.
    #[serde(rename = "type")]
    pub kind: String,
    /// Frame payload.
    pub data: Value,
    /// Server-side send time.
    pub timestamp: DateTime<Utc>,
    /// Echo of the triggering client `message_id`, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl ServerFrame {
    /// Build a frame with the current timestamp.
    #[must_use]
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }

    /// A `success` frame with a human-readable message.
    #[must_use]
    pub fn success(message: &str) -> Self {
        Self::new("success", json!({ "message": message }))
    }

    /// An `error` frame with a machine code and message.
    #[must_use]
    pub fn error(code: &str, message: &str) -> Self {
        Self::new("error", json!({ "code": code, "message": message }))
    }

    /// A `pong` reply.
    #[must_use]
    pub fn pong() -> Self {
        Self::new("pong", Value::Null)
    }

    /// A `subscription` reply carrying the accepted/denied partition.
    #[must_use]
    pub fn subscription(subscribed: &[String], denied: &[String]) -> Self {
        Self::new(
            "subscription",
            json!({ "subscribed": subscribed, "denied": denied }),
        )
    }

    /// A data frame carrying one [`Event`]. The frame kind is the event's
    /// wire name and the correlation id is carried through.
    #[must_use]
    pub fn event(event: &Event) -> Self {
        Self {
            kind: event.kind.as_str().to_owned(),
            data: event.data.clone(),
            timestamp: event.timestamp,
            correlation_id: event.correlation_id.clone(),
        }
    }

    /// Attach a correlation id (echo of a client `message_id`).
    #[must_use]
    pub fn with_correlation(mut self, id: Option<String>) -> Self {
        self.correlation_id = id;
        self
    }

    /// Serialize to wire JSON. Serialization of these frames cannot fail
    /// in practice; a failure yields an empty string and is the caller's
    /// signal to drop the frame.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[test]
    fn parse_full_envelope() {
        let raw = r#"{"type":"ping","data":{"x":1},"timestamp":"2026-01-01T00:00:00Z","message_id":"m1"}"#;
        let env = ClientEnvelope::parse(raw).unwrap();
        assert_eq!(env.kind, "ping");
        assert_eq!(env.data["x"], 1);
        assert_eq!(env.message_id.as_deref(), Some("m1"));
        assert_eq!(env.command(), CommandKind::Ping);
    }

    #[test]
    fn parse_minimal_envelope() {
        let env = ClientEnvelope::parse(r#"{"type":"subscribe"}"#).unwrap();
        assert_eq!(env.command(), CommandKind::Subscribe);
        assert!(env.data.is_null());
        assert!(env.message_id.is_none());
    }

    #[test]
    fn parse_rejects_malformed_json() {
        assert!(ClientEnvelope::parse("not json").is_err());
        assert!(ClientEnvelope::parse("[1,2,3]").is_err());
        assert!(ClientEnvelope::parse("{}").is_err());
    }

    #[test]
    fn command_kind_dispatch_table() {
        assert_eq!(CommandKind::from_name("ping"), CommandKind::Ping);
        assert_eq!(CommandKind::from_name("authenticate"), CommandKind::Authenticate);
        assert_eq!(CommandKind::from_name("subscribe"), CommandKind::Subscribe);
        assert_eq!(CommandKind::from_name("unsubscribe"), CommandKind::Unsubscribe);
        assert_eq!(CommandKind::from_name("command"), CommandKind::Command);
        assert_eq!(CommandKind::from_name("bogus"), CommandKind::Unknown);
        assert_eq!(CommandKind::from_name(""), CommandKind::Unknown);
    }

    #[test]
    fn pre_auth_allowlist() {
        assert!(CommandKind::Ping.allowed_before_auth());
        assert!(CommandKind::Authenticate.allowed_before_auth());
        assert!(!CommandKind::Subscribe.allowed_before_auth());
        assert!(!CommandKind::Unsubscribe.allowed_before_auth());
        assert!(!CommandKind::Command.allowed_before_auth());
        assert!(!CommandKind::Unknown.allowed_before_auth());
    }

    #[test]
    fn subscribe_payload_defaults_to_empty() {
        let payload: SubscribePayload = serde_json::from_value(json!({})).unwrap();
        assert!(payload.channels.is_empty());
    }

    #[test]
    fn success_frame_shape() {
        let frame = ServerFrame::success("Connected");
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "success");
        assert_eq!(value["data"]["message"], "Connected");
        assert!(value["timestamp"].is_string());
        assert!(value.get("correlation_id").is_none());
    }

    #[test]
    fn error_frame_shape() {
        let frame = ServerFrame::error("MALFORMED_MESSAGE", "invalid JSON");
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["data"]["code"], "MALFORMED_MESSAGE");
        assert_eq!(value["data"]["message"], "invalid JSON");
    }

    #[test]
    fn pong_echoes_correlation() {
        let frame = ServerFrame::pong().with_correlation(Some("ping-123".into()));
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "pong");
        assert_eq!(value["correlation_id"], "ping-123");
    }

    #[test]
    fn subscription_frame_partition() {
        let subscribed = vec!["metric:org-1:metrics".to_owned()];
        let denied = vec!["admin:org-1:admin".to_owned()];
        let frame = ServerFrame::subscription(&subscribed, &denied);
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["data"]["subscribed"][0], "metric:org-1:metrics");
        assert_eq!(value["data"]["denied"][0], "admin:org-1:admin");
    }

    #[test]
    fn event_frame_carries_kind_and_correlation() {
        let event = Event::new(
            EventKind::MetricsUserUpdate,
            "org-1",
            json!({"metric": "x"}),
            "collector",
        )
        .with_correlation("id-7");
        let frame = ServerFrame::event(&event);
        assert_eq!(frame.kind, "metrics.user_update");
        assert_eq!(frame.data["metric"], "x");
        assert_eq!(frame.correlation_id.as_deref(), Some("id-7"));
        assert_eq!(frame.timestamp, event.timestamp);
    }

    #[test]
    fn to_json_is_parseable() {
        let json = ServerFrame::success("ok").to_json();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "success");
    }
}
