//! Backbone-to-manager bridge.
//!
//! Registers one bus listener per event kind and forwards every received
//! event into both connection managers' local delivery paths. Because
//! managers relay their own publishes through the backbone (which loops
//! them back to this instance), local and remote origins share exactly
//! one fan-out path.

use std::sync::Arc;

use tracing::debug;

use pulse_backbone::EventBus;
use pulse_core::{Event, EventKind};

use crate::socket::SocketManager;
use crate::stream::SseManager;

/// Wires backbone events into the connection managers.
pub struct EventBridge {
    bus: Arc<EventBus>,
    sse: Arc<SseManager>,
    socket: Arc<SocketManager>,
}

impl EventBridge {
    /// Create a bridge over the given bus and managers.
    pub fn new(bus: Arc<EventBus>, sse: Arc<SseManager>, socket: Arc<SocketManager>) -> Self {
        Self { bus, sse, socket }
    }

    /// Register a listener for every event kind.
    pub async fn install(&self) {
        for kind in EventKind::ALL {
            let sse = self.sse.clone();
            let socket = self.socket.clone();
            self.bus
                .register_listener(kind, move |event: Event| {
                    let sse = sse.clone();
                    let socket = socket.clone();
                    Box::pin(async move {
                        let streamed = sse.deliver_local(&event).await;
                        let socketed = socket.deliver_local(&event).await;
                        debug!(
                            kind = %event.kind,
                            organization_id = %event.organization_id,
                            streamed,
                            socketed,
                            "event bridged to local connections"
                        );
                    })
                })
                .await;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenAuthenticator;
    use crate::config::GatewayConfig;
    use crate::stream::StreamFrame;
    use crate::transport::ChannelTransport;
    use futures::StreamExt;
    use pulse_backbone::MemoryTransport;
    use pulse_channels::ChannelRegistry;
    use serde_json::json;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    struct Fixture {
        bus: Arc<EventBus>,
        sse: Arc<SseManager>,
        socket: Arc<SocketManager>,
    }

    async fn fixture() -> Fixture {
        let registry = Arc::new(ChannelRegistry::new());
        let bus = Arc::new(EventBus::new(
            Arc::new(MemoryTransport::default()),
            "instance-a",
        ));
        let config = GatewayConfig::default();
        let sse = Arc::new(SseManager::new(
            registry.clone(),
            bus.clone(),
            &config,
            "instance-a",
        ));
        let authenticator =
            Arc::new(StaticTokenAuthenticator::new().with_token("valid-token", &["user"]));
        let socket = SocketManager::new(registry, bus.clone(), authenticator, &config, "instance-a");

        let bridge = EventBridge::new(bus.clone(), sse.clone(), socket.clone());
        bridge.install().await;
        bus.start().await.unwrap();
        Fixture { bus, sse, socket }
    }

    #[tokio::test]
    async fn backbone_event_reaches_both_transports() {
        let fx = fixture().await;

        // One SSE subscriber and one authenticated socket subscriber on
        // the same channel.
        let sse_conn = fx
            .sse
            .connect(
                "org-1",
                None,
                &["metric:org-1:metrics".to_owned()].into_iter().collect(),
            )
            .await
            .unwrap();
        let sse_stream = fx.sse.stream(&sse_conn.connection_id).await.unwrap();
        futures::pin_mut!(sse_stream);

        let (tx, mut ws_rx) = tokio::sync::mpsc::channel(32);
        let transport = Arc::new(ChannelTransport::new(tx));
        let ws_conn = fx
            .socket
            .connect(transport, "org-1", Some("u1"), HashSet::new())
            .await
            .unwrap();
        let _ = ws_rx.recv().await; // Connected
        assert!(fx.socket.authenticate(&ws_conn.id, "valid-token").await);
        let _ = ws_rx.recv().await; // Authenticated
        fx.socket
            .handle_message(
                &ws_conn.id,
                &json!({"type": "subscribe", "data": {"channels": ["metric:org-1:metrics"]}})
                    .to_string(),
            )
            .await;
        let _ = ws_rx.recv().await; // subscription reply

        // A producer publishes through the bus (as a remote instance would).
        let event = Event::new(
            EventKind::MetricsUserUpdate,
            "org-1",
            json!({"metric": "x"}),
            "metrics-collector",
        )
        .with_channel("metric:org-1:metrics");
        fx.bus.publish(&event).await.unwrap();

        let frame = timeout(WAIT, sse_stream.next()).await.unwrap().unwrap();
        assert!(matches!(frame, StreamFrame::Data { .. }));

        let text = timeout(WAIT, ws_rx.recv()).await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "metrics.user_update");

        fx.bus.stop().await;
    }

    #[tokio::test]
    async fn manager_publish_loops_back_through_bridge() {
        let fx = fixture().await;

        let sse_conn = fx
            .sse
            .connect(
                "org-1",
                None,
                &["metric:org-1:metrics".to_owned()].into_iter().collect(),
            )
            .await
            .unwrap();
        let sse_stream = fx.sse.stream(&sse_conn.connection_id).await.unwrap();
        futures::pin_mut!(sse_stream);

        // Publish through the SOCKET manager; the SSE subscriber still
        // receives it because fan-out goes through the shared bridge path.
        fx.socket
            .publish(
                "metric:org-1:metrics",
                EventKind::MetricsUserUpdate,
                json!({"metric": "x"}),
                None,
            )
            .await;

        let frame = timeout(WAIT, sse_stream.next()).await.unwrap().unwrap();
        let StreamFrame::Data { event, .. } = frame else {
            panic!("expected data frame");
        };
        assert_eq!(event, "metrics.user_update");

        fx.bus.stop().await;
    }

    #[tokio::test]
    async fn cross_org_events_do_not_leak_through_bridge() {
        let fx = fixture().await;

        let sse_conn = fx
            .sse
            .connect(
                "org-2",
                None,
                &["metric:org-2:metrics".to_owned()].into_iter().collect(),
            )
            .await
            .unwrap();
        let sse_stream = fx.sse.stream(&sse_conn.connection_id).await.unwrap();
        futures::pin_mut!(sse_stream);

        fx.sse
            .publish(
                "metric:org-1:metrics",
                EventKind::MetricsUserUpdate,
                json!({}),
                None,
            )
            .await;

        assert!(
            timeout(Duration::from_millis(200), sse_stream.next())
                .await
                .is_err()
        );
        fx.bus.stop().await;
    }
}
