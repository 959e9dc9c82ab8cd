//! Prometheus metrics recorder and metric name constants.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render the `/metrics` endpoint. Call once at
/// startup before any metrics are recorded.
pub fn install_recorder() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            info!("prometheus metrics recorder installed");
            Some(handle)
        }
        Err(err) => {
            tracing::warn!(error = %err, "metrics recorder install failed, continuing without");
            None
        }
    }
}

/// Render Prometheus text format from the installed recorder.
#[must_use]
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// Streaming connections opened total (counter).
pub const SSE_CONNECTIONS_TOTAL: &str = "sse_connections_total";
/// Active streaming connections (gauge).
pub const SSE_CONNECTIONS_ACTIVE: &str = "sse_connections_active";
/// Streaming frames dropped on full queues (counter).
pub const SSE_DROPPED_FRAMES_TOTAL: &str = "sse_dropped_frames_total";
/// Socket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Socket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active socket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Socket connects refused by the per-organization quota (counter).
pub const WS_QUOTA_REJECTIONS_TOTAL: &str = "ws_quota_rejections_total";
/// Socket frames dropped on full queues (counter).
pub const WS_DROPPED_FRAMES_TOTAL: &str = "ws_dropped_frames_total";
/// Socket connection duration seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Events published total (counter, labels: transport).
pub const EVENTS_PUBLISHED_TOTAL: &str = "events_published_total";
/// Publishes that skipped remote fan-out because the backbone was down
/// (counter).
pub const BACKBONE_PUBLISH_FAILURES_TOTAL: &str = "backbone_publish_failures_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_produces_text() {
        // Build a recorder + handle without installing globally, to avoid
        // cross-test conflicts.
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = handle.render();
        assert!(output.is_empty() || output.contains('\n') || output.contains('#'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            SSE_CONNECTIONS_TOTAL,
            SSE_CONNECTIONS_ACTIVE,
            SSE_DROPPED_FRAMES_TOTAL,
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_QUOTA_REJECTIONS_TOTAL,
            WS_DROPPED_FRAMES_TOTAL,
            WS_CONNECTION_DURATION_SECONDS,
            EVENTS_PUBLISHED_TOTAL,
            BACKBONE_PUBLISH_FAILURES_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
