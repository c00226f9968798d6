//! Server configuration: defaults, resolution from the environment, validation.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use agentic_stream::DEFAULT_BUFFER_CAPACITY;

pub const DEFAULT_ADDR: &str = "127.0.0.1:3100";
pub const DEFAULT_ENDPOINT: &str = "/mcp";
pub const TOKEN_ENV: &str = "AGENTIC_TOKEN";
pub const ADDR_ENV: &str = "AGENTIC_STREAM_ADDR";

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid listen address {0:?}")]
    InvalidAddr(String),

    #[error("Endpoint must be an absolute path other than /health, got {0:?}")]
    InvalidEndpoint(String),

    #[error("Event buffer capacity must be at least 1")]
    ZeroBuffer,

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("Bearer token must not be empty")]
    EmptyToken,
}

/// Everything the HTTP transport needs to know about its deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    pub endpoint: String,
    /// Issue and require `Mcp-Session-Id`. When false, all traffic shares one anonymous scope.
    pub stateful: bool,
    /// Answer POSTs with a JSON body unless a target handler streams.
    pub json_response: bool,
    pub enable_get_stream: bool,
    pub event_buffer_capacity: usize,
    pub session_ttl: Duration,
    pub pending_call_timeout: Duration,
    /// Close a GET stream after this long without an event.
    pub stream_idle_timeout: Option<Duration>,
    pub keep_alive_interval: Duration,
    pub closed_stream_retention: Duration,
    pub maintenance_interval: Duration,
    /// Extra `Origin` values to accept. Same-host origins are always accepted.
    pub allowed_origins: Vec<String>,
    #[serde(skip_serializing)]
    pub token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            stateful: true,
            json_response: true,
            enable_get_stream: true,
            event_buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            session_ttl: Duration::from_secs(30 * 60),
            pending_call_timeout: Duration::from_secs(60),
            stream_idle_timeout: None,
            keep_alive_interval: Duration::from_secs(15),
            closed_stream_retention: Duration::from_secs(5 * 60),
            maintenance_interval: Duration::from_secs(60),
            allowed_origins: Vec::new(),
            token: None,
        }
    }
}

impl ServerConfig {
    /// Defaults overlaid with `AGENTIC_STREAM_ADDR` and `AGENTIC_TOKEN`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var(ADDR_ENV) {
            config.addr = addr;
        }
        config.token = resolve_token(None);
        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.addr
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidAddr(self.addr.clone()))?;

        if !self.endpoint.starts_with('/') || self.endpoint == "/health" {
            return Err(ConfigError::InvalidEndpoint(self.endpoint.clone()));
        }

        if self.event_buffer_capacity == 0 {
            return Err(ConfigError::ZeroBuffer);
        }

        for (name, value) in [
            ("session_ttl", self.session_ttl),
            ("pending_call_timeout", self.pending_call_timeout),
            ("keep_alive_interval", self.keep_alive_interval),
            ("maintenance_interval", self.maintenance_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration(name));
            }
        }

        if self.stream_idle_timeout.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::ZeroDuration("stream_idle_timeout"));
        }

        if self.token.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigError::EmptyToken);
        }

        Ok(())
    }
}

/// Explicit token wins, then `AGENTIC_TOKEN`. Empty values count as unset.
pub fn resolve_token(explicit: Option<&str>) -> Option<String> {
    if let Some(token) = explicit.filter(|t| !t.is_empty()) {
        return Some(token.to_string());
    }

    std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.event_buffer_capacity, 256);
        assert_eq!(config.session_ttl, Duration::from_secs(1800));
        assert!(config.stream_idle_timeout.is_none());
    }

    #[test]
    fn test_rejects_bad_values() {
        let config = ServerConfig {
            addr: "not-an-addr".into(),
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidAddr("not-an-addr".into()))
        );

        let config = ServerConfig {
            endpoint: "mcp".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidEndpoint(_))));

        let config = ServerConfig {
            event_buffer_capacity: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroBuffer));

        let config = ServerConfig {
            stream_idle_timeout: Some(Duration::ZERO),
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroDuration("stream_idle_timeout"))
        );
    }

    #[test]
    fn test_explicit_token_wins() {
        assert_eq!(resolve_token(Some("abc")), Some("abc".to_string()));
    }

    #[test]
    fn test_token_not_serialized() {
        let config = ServerConfig {
            token: Some("secret".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }
}
