//! Connection manager errors.

use pulse_core::ConnectionId;
use pulse_channels::RegistryError;
use thiserror::Error;

/// Errors surfaced by the connection managers.
///
/// ACL denials are never errors — they appear in the `denied` partition of
/// subscribe replies. Backbone outages are never errors either; publishers
/// degrade to local-only delivery.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// An empty organization id was supplied.
    #[error("organization id must not be empty")]
    InvalidOrganization,

    /// The organization's connection quota is full.
    #[error("organization {organization_id} reached its connection quota ({limit})")]
    CapacityExceeded {
        /// Organization that hit the quota.
        organization_id: String,
        /// The configured quota.
        limit: usize,
    },

    /// No connection with this id is registered.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// `stream()` was already called for this connection.
    #[error("stream already consumed for connection {0}")]
    StreamConsumed(ConnectionId),

    /// The initial handshake frame could not be delivered.
    #[error("transport send failed during handshake")]
    TransportFailed,

    /// Registry rejected the operation.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_message_names_org_and_limit() {
        let err = ConnectError::CapacityExceeded {
            organization_id: "org-1".into(),
            limit: 100,
        };
        let msg = err.to_string();
        assert!(msg.contains("org-1"));
        assert!(msg.contains("100"));
    }

    #[test]
    fn registry_error_converts() {
        let err: ConnectError = RegistryError::InvalidOrganization.into();
        assert!(matches!(err, ConnectError::Registry(_)));
    }
}
