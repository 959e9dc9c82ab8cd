//! Connection close reasons.
//!
//! Every forced close carries a specific reason so clients never see an
//! ambiguous half-open state: they either get a recoverable `error` frame
//! or a close with one of these codes and must reconnect.

use serde::{Deserialize, Serialize};

/// Why a connection was closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Authentication did not complete within the timeout.
    AuthTimeout,
    /// Token validation failed.
    AuthFailed,
    /// The organization's connection quota was already full.
    CapacityExceeded,
    /// The client stopped answering liveness pings.
    LivenessTimeout,
    /// The outbound transport failed; the connection is considered dead.
    TransportError,
    /// The server is shutting down.
    ServerShutdown,
    /// The client closed the connection.
    ClientRequest,
}

impl CloseReason {
    /// Stable wire code for this reason.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthTimeout => "auth_timeout",
            Self::AuthFailed => "auth_failed",
            Self::CapacityExceeded => "capacity_exceeded",
            Self::LivenessTimeout => "liveness_timeout",
            Self::TransportError => "transport_error",
            Self::ServerShutdown => "server_shutdown",
            Self::ClientRequest => "client_request",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
