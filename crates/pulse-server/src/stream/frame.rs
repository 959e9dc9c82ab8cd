//! Streaming push frame formatting.
//!
//! Standard two-field event framing: an event name line and a JSON data
//! line, each frame terminated by a blank line. Heartbeats are comment
//! frames so intermediaries keep the connection alive without clients
//! seeing data.

use pulse_core::{Event, ServerFrame};

/// One element of a connection's outbound stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamFrame {
    /// Keep-alive comment frame.
    Heartbeat,
    /// Data frame carrying one serialized event.
    Data {
        /// Event name (the event kind's wire name).
        event: String,
        /// JSON payload (the serialized envelope).
        data: String,
        /// Resume id, when the publisher supplied one.
        id: Option<String>,
    },
}

impl StreamFrame {
    /// Build a data frame from an event. The resume id is the event's
    /// correlation id, when present.
    #[must_use]
    pub fn from_event(event: &Event) -> Self {
        Self::Data {
            event: event.kind.as_str().to_owned(),
            data: ServerFrame::event(event).to_json(),
            id: event.correlation_id.clone(),
        }
    }

    /// Whether this is a heartbeat frame.
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Self::Heartbeat)
    }

    /// Render the wire text for this frame, blank-line terminated.
    #[must_use]
    pub fn to_wire(&self) -> String {
        match self {
            Self::Heartbeat => ": heartbeat\n\n".to_owned(),
            Self::Data { event, data, id } => match id {
                Some(id) => format!("event: {event}\nid: {id}\ndata: {data}\n\n"),
                None => format!("event: {event}\ndata: {data}\n\n"),
            },
        }
    }
}
