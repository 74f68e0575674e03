use std::time::Duration;

use cte_core::status::DEFAULT_TOPIC_PREFIX;

use crate::channel::ChannelConfig;
use crate::client::HeartbeatConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::reconnect::ReconnectConfig;

/// Client configuration loaded from environment variables.
///
/// All fields have defaults suitable for a backend on `localhost:8080`.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupingConfig {
    /// REST base URL including the `/api` prefix.
    pub api_base_url: String,
    /// Full STOMP broker URL (`ws://` or `wss://`).
    pub ws_url: String,
    pub topic_prefix: String,
    pub fallback_delay: Duration,
    pub reconnect_delay: Duration,
    pub heartbeat: HeartbeatConfig,
    pub completion_grace: Duration,
    pub request_timeout: Duration,
}

/// Invalid configuration value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be a non-negative integer, got {value:?}")]
    Invalid { var: &'static str, value: String },
}

impl GroupingConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                 | Default                     |
    /// |-------------------------|-----------------------------|
    /// | `API_BASE_URL`          | `http://localhost:8080/api` |
    /// | `WS_BASE_URL`           | `ws://localhost:8080`       |
    /// | `WS_ENDPOINT`           | `/ws-grouping`              |
    /// | `TOPIC_PREFIX`          | `/topic`                    |
    /// | `FALLBACK_DELAY_MS`     | `5000`                      |
    /// | `RECONNECT_DELAY_MS`    | `5000`                      |
    /// | `HEARTBEAT_INCOMING_MS` | `4000`                      |
    /// | `HEARTBEAT_OUTGOING_MS` | `4000`                      |
    /// | `COMPLETION_GRACE_MS`   | `1000`                      |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                        |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let string = |var: &str, default: &str| lookup(var).unwrap_or_else(|| default.into());
        let number = |var: &'static str, default: u64| -> Result<u64, ConfigError> {
            match lookup(var) {
                None => Ok(default),
                Some(value) => value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::Invalid { var, value }),
            }
        };

        let ws_base = to_ws_scheme(&string("WS_BASE_URL", "ws://localhost:8080"));
        let endpoint = string("WS_ENDPOINT", "/ws-grouping");

        Ok(Self {
            api_base_url: string("API_BASE_URL", "http://localhost:8080/api"),
            ws_url: format!("{}{}", ws_base.trim_end_matches('/'), endpoint),
            topic_prefix: string("TOPIC_PREFIX", DEFAULT_TOPIC_PREFIX),
            fallback_delay: Duration::from_millis(number("FALLBACK_DELAY_MS", 5000)?),
            reconnect_delay: Duration::from_millis(number("RECONNECT_DELAY_MS", 5000)?),
            heartbeat: HeartbeatConfig {
                incoming: Duration::from_millis(number("HEARTBEAT_INCOMING_MS", 4000)?),
                outgoing: Duration::from_millis(number("HEARTBEAT_OUTGOING_MS", 4000)?),
            },
            completion_grace: Duration::from_millis(number("COMPLETION_GRACE_MS", 1000)?),
            request_timeout: Duration::from_secs(number("REQUEST_TIMEOUT_SECS", 30)?),
        })
    }

    /// Status-channel settings derived from this config.
    pub fn channel(&self) -> ChannelConfig {
        ChannelConfig {
            topic_prefix: self.topic_prefix.clone(),
            reconnect: ReconnectConfig::fixed(self.reconnect_delay),
            completion_grace: self.completion_grace,
        }
    }

    /// Orchestrator settings derived from this config.
    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            fallback_delay: self.fallback_delay,
            channel: self.channel(),
        }
    }
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".into(),
            ws_url: "ws://localhost:8080/ws-grouping".into(),
            topic_prefix: DEFAULT_TOPIC_PREFIX.into(),
            fallback_delay: Duration::from_millis(5000),
            reconnect_delay: Duration::from_millis(5000),
            heartbeat: HeartbeatConfig::default(),
            completion_grace: Duration::from_millis(1000),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Rewrite `http(s)://` to `ws(s)://`; other schemes pass through.
fn to_ws_scheme(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}
