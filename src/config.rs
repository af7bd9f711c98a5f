use std::time::Duration;

use serde_json::Value;

use crate::error::AdapterError;
use crate::model::result::Params;
use crate::protocol::DEFAULT_ADAPTER_VERSION;

pub const DEFAULT_SERVER_URL: &str = "wss://conjure.lautrek.com/api/v1/adapter/ws";
pub const DEFAULT_ADAPTER_TYPE: &str = "generic";

const CONJURE_SERVER_URL_ENV: &str = "CONJURE_SERVER_URL";
const CONJURE_API_KEY_ENV: &str = "CONJURE_API_KEY";
const CONJURE_ADAPTER_ID_ENV: &str = "CONJURE_ADAPTER_ID";

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) const DEFAULT_RECV_BUFFER_SIZE: usize = 8192;

/// Persistent connection settings.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerClientConfig {
    pub server_url: String,
    pub api_key: Option<String>,
    pub adapter_id: Option<String>,
    pub adapter_type: String,
    pub version: String,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    /// Zero disables heartbeats.
    pub heartbeat_interval: Duration,
    pub connect_timeout: Duration,
    /// Extra fields merged into the registration record.
    pub metadata: Params,
}

impl ServerClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn adapter_id(mut self, adapter_id: impl Into<String>) -> Self {
        self.adapter_id = Some(adapter_id.into());
        self
    }

    pub fn adapter_type(mut self, adapter_type: impl Into<String>) -> Self {
        self.adapter_type = adapter_type.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Applies `CONJURE_SERVER_URL`, `CONJURE_API_KEY` and `CONJURE_ADAPTER_ID`
    /// when they are set and non-empty.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(url) = env_value(CONJURE_SERVER_URL_ENV) {
            self.server_url = url;
        }
        if let Some(api_key) = env_value(CONJURE_API_KEY_ENV) {
            self.api_key = Some(api_key);
        }
        if let Some(adapter_id) = env_value(CONJURE_ADAPTER_ID_ENV) {
            self.adapter_id = Some(adapter_id);
        }
        self
    }

    pub fn validate(&self) -> Result<(), AdapterError> {
        let url = self.server_url.trim();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(config_error(format!(
                "server_url `{}` must use the ws:// or wss:// scheme",
                self.server_url
            )));
        }
        if self.adapter_type.trim().is_empty() {
            return Err(config_error("adapter_type must not be empty"));
        }
        if self.connect_timeout.is_zero() {
            return Err(config_error("connect_timeout must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for ServerClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            api_key: None,
            adapter_id: None,
            adapter_type: DEFAULT_ADAPTER_TYPE.to_string(),
            version: DEFAULT_ADAPTER_VERSION.to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            metadata: Params::new(),
        }
    }
}

/// Generic engine settings.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EngineConfig {
    pub timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// Where a [`crate::transport::SocketClient`] finds the CAD application.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SocketClientConfig {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
    pub recv_buffer_size: usize,
}

impl SocketClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), AdapterError> {
        validate_host(&self.host)?;
        if self.recv_buffer_size == 0 {
            return Err(config_error("recv_buffer_size must be greater than zero"));
        }
        if self.timeout.is_zero() {
            return Err(config_error("timeout must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for SocketClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 9876,
            timeout: EngineConfig::default().timeout,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
        }
    }
}

/// Listening side of the in-process command server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SocketServerConfig {
    pub host: String,
    /// Zero binds an ephemeral port.
    pub port: u16,
    pub operation_timeout: Duration,
    pub recv_buffer_size: usize,
    pub max_ops_per_call: usize,
}

impl SocketServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    pub fn max_ops_per_call(mut self, max_ops: usize) -> Self {
        self.max_ops_per_call = max_ops;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), AdapterError> {
        validate_host(&self.host)?;
        if self.recv_buffer_size == 0 {
            return Err(config_error("recv_buffer_size must be greater than zero"));
        }
        if self.operation_timeout.is_zero() {
            return Err(config_error("operation_timeout must be greater than zero"));
        }
        if self.max_ops_per_call == 0 {
            return Err(config_error("max_ops_per_call must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for SocketServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9877,
            operation_timeout: Duration::from_secs(60),
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            max_ops_per_call: 10,
        }
    }
}

fn validate_host(host: &str) -> Result<(), AdapterError> {
    if host.trim().is_empty() {
        return Err(config_error("host must not be empty"));
    }
    Ok(())
}

fn config_error(reason: impl Into<String>) -> AdapterError {
    AdapterError::Config {
        reason: reason.into(),
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::{ServerClientConfig, SocketClientConfig, SocketServerConfig};
    use crate::error::AdapterError;

    #[test]
    fn defaults_match_hosted_service() {
        let config = ServerClientConfig::default();
        assert_eq!(
            config.server_url,
            "wss://conjure.lautrek.com/api/v1/adapter/ws"
        );
        assert_eq!(config.adapter_type, "generic");
        assert_eq!(config.version, "1.0.0");
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.max_reconnect_attempts, 10);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert!(config.api_key.is_none());

        let client = SocketClientConfig::default();
        assert_eq!(client.address(), "localhost:9876");
        assert_eq!(client.timeout, Duration::from_secs(30));
        assert_eq!(client.recv_buffer_size, 8192);

        let server = SocketServerConfig::default();
        assert_eq!(server.address(), "127.0.0.1:9877");
        assert_eq!(server.operation_timeout, Duration::from_secs(60));
        assert_eq!(server.max_ops_per_call, 10);
    }

    #[test]
    fn builder_sets_fields() {
        let config = ServerClientConfig::new("ws://127.0.0.1:8000/ws")
            .api_key("sk_test_123")
            .adapter_type("freecad")
            .adapter_id("adapter_001")
            .metadata("host_version", json!("0.21"));

        assert_eq!(config.api_key.as_deref(), Some("sk_test_123"));
        assert_eq!(config.adapter_type, "freecad");
        assert_eq!(config.metadata.get("host_version"), Some(&json!("0.21")));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_non_websocket_url() {
        let err = ServerClientConfig::new("https://conjure.lautrek.com")
            .validate()
            .expect_err("https URL should be rejected");
        assert!(matches!(err, AdapterError::Config { .. }));
    }

    #[test]
    fn validate_rejects_degenerate_socket_settings() {
        assert!(SocketClientConfig::new("", 9876).validate().is_err());
        assert!(SocketClientConfig::default()
            .recv_buffer_size(0)
            .validate()
            .is_err());
        assert!(SocketServerConfig::default()
            .operation_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(SocketServerConfig::new("127.0.0.1", 0).validate().is_ok());
    }
}
