//! Client configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config.
//! Durations are written in milliseconds on disk:
//!
//! ```json
//! {
//!   "server_url": "wss://atelier.example/ws",
//!   "heartbeat_interval_ms": 30000,
//!   "reconnect": { "policy": "exponential", "initial_ms": 1000, "max_ms": 60000 }
//! }
//! ```

use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: `{field}` must be greater than zero")]
    Zero { field: &'static str },
}

/// How long to wait before reopening a closed transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ReconnectPolicy {
    Fixed {
        #[serde(rename = "delay_ms", with = "duration_ms")]
        delay: Duration,
    },
    /// Doubles per consecutive failed attempt, capped at `max`.
    Exponential {
        #[serde(rename = "initial_ms", with = "duration_ms")]
        initial: Duration,
        #[serde(rename = "max_ms", with = "duration_ms")]
        max: Duration,
    },
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            ReconnectPolicy::Fixed { delay } => delay,
            ReconnectPolicy::Exponential { initial, max } => {
                let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed {
            delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// WebSocket endpoint of the workspace server
    pub server_url: String,
    /// Client-initiated ping period
    #[serde(rename = "heartbeat_interval_ms", with = "duration_ms")]
    pub heartbeat_interval: Duration,
    pub reconnect: ReconnectPolicy,
    /// Bound on a single transport open attempt
    #[serde(rename = "connect_timeout_ms", with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Buffer size of the `SyncEvent` broadcast channel
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8080/ws".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            event_capacity: 256,
        }
    }
}

impl SyncConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Default::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the connection task cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::Zero {
                field: "heartbeat_interval_ms",
            });
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::Zero {
                field: "connect_timeout_ms",
            });
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Zero { field: "event_capacity" });
        }
        Ok(())
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Defaults overridden by `ATELIER_*` environment variables. Unset or
    /// unparsable variables keep the default, as does a zero heartbeat.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let secs = |name: &str| {
            lookup(name)
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
        };

        let mut config = Self::default();
        if let Some(url) = lookup("ATELIER_SERVER_URL").filter(|s| !s.is_empty()) {
            config.server_url = url;
        }
        if let Some(period) = secs("ATELIER_HEARTBEAT_SECS").filter(|p| !p.is_zero()) {
            config.heartbeat_interval = period;
        }
        match (secs("ATELIER_RECONNECT_SECS"), secs("ATELIER_RECONNECT_MAX_SECS")) {
            (initial, Some(max)) => {
                config.reconnect = ReconnectPolicy::Exponential {
                    initial: initial.unwrap_or(Duration::from_secs(1)),
                    max,
                };
            }
            (Some(delay), None) => config.reconnect = ReconnectPolicy::Fixed { delay },
            (None, None) => {}
        }
        config
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.reconnect.delay_for(7), Duration::from_secs(5));
        assert_eq!(config.event_capacity, 256);
    }

    #[test]
    fn test_empty_json_is_default() {
        assert_eq!(SyncConfig::from_json_str("{}").unwrap(), SyncConfig::default());
    }

    #[test]
    fn test_json_fields() {
        let config = SyncConfig::from_json_str(
            r#"{
                "server_url": "ws://example:1/ws",
                "heartbeat_interval_ms": 1500,
                "reconnect": {"policy": "exponential", "initial_ms": 100, "max_ms": 1000}
            }"#,
        )
        .unwrap();
        assert_eq!(config.server_url, "ws://example:1/ws");
        assert_eq!(config.heartbeat_interval, Duration::from_millis(1500));
        assert_eq!(
            config.reconnect,
            ReconnectPolicy::Exponential {
                initial: Duration::from_millis(100),
                max: Duration::from_millis(1000),
            }
        );
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(matches!(
            SyncConfig::from_json_str(r#"{"reconnect": {"policy": "sometimes"}}"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_zero_periods_rejected() {
        for json in [
            r#"{"heartbeat_interval_ms": 0}"#,
            r#"{"connect_timeout_ms": 0}"#,
            r#"{"event_capacity": 0}"#,
        ] {
            assert!(
                matches!(SyncConfig::from_json_str(json), Err(ConfigError::Zero { .. })),
                "{json}"
            );
        }
    }

    #[test]
    fn test_env_zero_heartbeat_keeps_default() {
        let config = SyncConfig::from_lookup(|name| (name == "ATELIER_HEARTBEAT_SECS").then(|| "0".to_string()));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"event_capacity": 16}}"#).unwrap();
        let config = SyncConfig::from_file(file.path()).unwrap();
        assert_eq!(config.event_capacity, 16);

        assert!(matches!(
            SyncConfig::from_file(file.path().with_extension("missing")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_exponential_backoff_capped() {
        let policy = ReconnectPolicy::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5), Duration::from_secs(1));
        assert_eq!(policy.delay_for(90), Duration::from_secs(1));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("ATELIER_SERVER_URL", "ws://env:9/ws"),
            ("ATELIER_HEARTBEAT_SECS", "12"),
            ("ATELIER_RECONNECT_SECS", "2"),
        ]
        .into_iter()
        .collect();
        let config = SyncConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.server_url, "ws://env:9/ws");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(12));
        assert_eq!(
            config.reconnect,
            ReconnectPolicy::Fixed {
                delay: Duration::from_secs(2)
            }
        );
    }

    #[test]
    fn test_env_max_selects_backoff() {
        let config = SyncConfig::from_lookup(|name| {
            (name == "ATELIER_RECONNECT_MAX_SECS").then(|| "30".to_string())
        });
        assert_eq!(
            config.reconnect,
            ReconnectPolicy::Exponential {
                initial: Duration::from_secs(1),
                max: Duration::from_secs(30),
            }
        );
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
    }
}
