//! Endpoint configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a hub (server-role registry).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HubConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Interval between heartbeat probes, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// How long to wait for any reply before timing it out, in milliseconds.
    pub reply_timeout_ms: u64,
    /// Outbound frame queue depth per connection.
    pub outbound_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            heartbeat_interval_ms: 5000,
            reply_timeout_ms: 5000,
            outbound_capacity: 256,
        }
    }
}

impl HubConfig {
    /// Heartbeat interval as a [`Duration`].
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Reply timeout as a [`Duration`].
    #[must_use]
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}

/// Configuration for a client-role endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// How long to wait for any reply before timing it out, in milliseconds.
    pub reply_timeout_ms: u64,
    /// Delay before a reconnect attempt after the channel closes, in milliseconds.
    pub reconnect_backoff_ms: u64,
    /// Outbound frame queue depth.
    pub outbound_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reply_timeout_ms: 5000,
            reconnect_backoff_ms: 500,
            outbound_capacity: 256,
        }
    }
}

impl ClientConfig {
    /// Reply timeout as a [`Duration`].
    #[must_use]
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    /// Reconnect backoff as a [`Duration`].
    #[must_use]
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_hub_host_and_port() {
        let cfg = HubConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
    }

    #[test]
    fn default_heartbeat_interval() {
        let cfg = HubConfig::default();
        assert_eq!(cfg.heartbeat_interval(), Duration::from_millis(5000));
    }

    #[test]
    fn default_reply_timeout() {
        assert_eq!(HubConfig::default().reply_timeout_ms, 5000);
        assert_eq!(ClientConfig::default().reply_timeout_ms, 5000);
    }

    #[test]
    fn default_reconnect_backoff() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.reconnect_backoff(), Duration::from_millis(500));
    }

    #[test]
    fn hub_config_serde_roundtrip() {
        let cfg = HubConfig {
            host: "0.0.0.0".into(),
            port: 8000,
            heartbeat_interval_ms: 1000,
            reply_timeout_ms: 2000,
            outbound_capacity: 64,
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: HubConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.host, cfg.host);
        assert_eq!(back.port, cfg.port);
        assert_eq!(back.heartbeat_interval_ms, cfg.heartbeat_interval_ms);
        assert_eq!(back.reply_timeout_ms, cfg.reply_timeout_ms);
        assert_eq!(back.outbound_capacity, cfg.outbound_capacity);
    }

    #[test]
    fn client_config_deserialize_from_json() {
        let json = r#"{"reply_timeout_ms":100,"reconnect_backoff_ms":50,"outbound_capacity":8}"#;
        let cfg: ClientConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.reply_timeout_ms, 100);
        assert_eq!(cfg.reconnect_backoff_ms, 50);
        assert_eq!(cfg.outbound_capacity, 8);
    }
}
