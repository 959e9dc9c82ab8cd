//! Gateway configuration.
//!
//! Loading flow mirrors the platform convention:
//!
//! 1. Start with compiled [`GatewayConfig::default()`]
//! 2. If a config file exists, deep-merge its values over the defaults
//! 3. Apply environment variable overrides (highest priority)

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Configuration for the Pulse gateway.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// SSE heartbeat interval in seconds of inactivity.
    pub heartbeat_interval_secs: u64,
    /// Connection quota per organization.
    pub max_connections_per_org: usize,
    /// Socket Ping interval in seconds.
    pub ping_interval_secs: u64,
    /// Close a socket after this many seconds without a Pong.
    pub pong_timeout_secs: u64,
    /// Seconds an unauthenticated socket may live.
    pub auth_timeout_secs: u64,
    /// Per-connection outbound queue depth.
    pub outbound_buffer: usize,
    /// Redis URL for the event backbone; in-memory loopback when unset.
    pub redis_url: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            heartbeat_interval_secs: 30,
            max_connections_per_org: 100,
            ping_interval_secs: 30,
            pong_timeout_secs: 90,
            auth_timeout_secs: 10,
            outbound_buffer: 256,
            redis_url: None,
        }
    }
}

impl GatewayConfig {
    /// SSE heartbeat interval.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Socket ping interval.
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Socket pong timeout.
    #[must_use]
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }

    /// Auth handshake timeout.
    #[must_use]
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }
}

/// Config loading error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The config file contains invalid JSON.
    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Load config from `path` with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_from_path(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let defaults = serde_json::to_value(GatewayConfig::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading gateway config");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "config file not found, using defaults");
        defaults
    };

    let mut config: GatewayConfig = serde_json::from_value(merged)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
#[must_use]
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `PULSE_*` environment variable overrides.
fn apply_env_overrides(config: &mut GatewayConfig) {
    if let Ok(host) = std::env::var("PULSE_HOST") {
        config.host = host;
    }
    if let Ok(port) = std::env::var("PULSE_PORT") {
        if let Ok(port) = port.parse() {
            config.port = port;
        }
    }
    if let Ok(url) = std::env::var("PULSE_REDIS_URL") {
        config.redis_url = Some(url);
    }
    if let Ok(max) = std::env::var("PULSE_MAX_CONNECTIONS_PER_ORG") {
        if let Ok(max) = max.parse() {
            config.max_connections_per_org = max;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.heartbeat_interval_secs, 30);
        assert_eq!(cfg.max_connections_per_org, 100);
        assert_eq!(cfg.ping_interval_secs, 30);
        assert_eq!(cfg.pong_timeout_secs, 90);
        assert_eq!(cfg.auth_timeout_secs, 10);
        assert_eq!(cfg.outbound_buffer, 256);
        assert!(cfg.redis_url.is_none());
    }

    #[test]
    fn duration_helpers() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(cfg.ping_interval(), Duration::from_secs(30));
        assert_eq!(cfg.pong_timeout(), Duration::from_secs(90));
        assert_eq!(cfg.auth_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = GatewayConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: GatewayConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.host, cfg.host);
        assert_eq!(back.max_connections_per_org, cfg.max_connections_per_org);
    }

    #[test]
    fn partial_file_merges_over_defaults() {
        let defaults = serde_json::to_value(GatewayConfig::default()).unwrap();
        let user = json!({ "port": 8080, "max_connections_per_org": 5 });
        let merged: GatewayConfig = serde_json::from_value(deep_merge(defaults, user)).unwrap();
        assert_eq!(merged.port, 8080);
        assert_eq!(merged.max_connections_per_org, 5);
        // Untouched values keep defaults
        assert_eq!(merged.host, "127.0.0.1");
        assert_eq!(merged.heartbeat_interval_secs, 30);
    }

    #[test]
    fn null_values_preserve_defaults() {
        let defaults = json!({ "host": "127.0.0.1", "port": 0 });
        let user = json!({ "host": null, "port": 9000 });
        let merged = deep_merge(defaults, user);
        assert_eq!(merged["host"], "127.0.0.1");
        assert_eq!(merged["port"], 9000);
    }

    #[test]
    fn deep_merge_replaces_primitives_and_arrays() {
        let merged = deep_merge(json!([1, 2]), json!([3]));
        assert_eq!(merged, json!([3]));
        let merged = deep_merge(json!(1), json!("x"));
        assert_eq!(merged, json!("x"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = load_from_path(Path::new("/nonexistent/pulse.json")).unwrap();
        assert_eq!(cfg.port, GatewayConfig::default().port);
    }
}
