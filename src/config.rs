//! Connection settings: compiled-in defaults with an optional environment overlay.

use crate::error::ClientError;
use crate::protocol::FrameLimits;
use crate::{DEFAULT_HOST, DEFAULT_PORT};
use std::time::Duration;

/// Default per-call socket timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Size of each socket read while waiting for a reply
pub const DEFAULT_READ_CHUNK: usize = 4096;

pub const ENV_HOST: &str = "RESPWIRE_HOST";
pub const ENV_PORT: &str = "RESPWIRE_PORT";
pub const ENV_TIMEOUT_MS: &str = "RESPWIRE_TIMEOUT_MS";

/// Everything `Connection::open` needs to know
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Applies to connect and to every individual read and write; must be non-zero.
    pub timeout: Duration,
    pub read_chunk: usize,
    pub nodelay: bool,
    pub limits: FrameLimits,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            timeout: DEFAULT_TIMEOUT,
            read_chunk: DEFAULT_READ_CHUNK,
            nodelay: true,
            limits: FrameLimits::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `RESPWIRE_HOST`, `RESPWIRE_PORT` and
    /// `RESPWIRE_TIMEOUT_MS` when those are set.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup (the environment in production)
    pub fn overlay<F>(mut self, lookup: F) -> Result<Self, ClientError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_HOST) {
            if host.trim().is_empty() {
                return Err(ClientError::InvalidConfig(format!("{} is empty", ENV_HOST)));
            }
            self.host = host.trim().to_string();
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.port = port.trim().parse::<u16>().map_err(|e| {
                ClientError::InvalidConfig(format!("{}={:?}: {}", ENV_PORT, port, e))
            })?;
        }
        if let Some(ms) = lookup(ENV_TIMEOUT_MS) {
            let ms = ms.trim().parse::<u64>().map_err(|e| {
                ClientError::InvalidConfig(format!("{}={:?}: {}", ENV_TIMEOUT_MS, ms, e))
            })?;
            self.timeout = Duration::from_millis(ms);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn read_chunk(mut self, size: usize) -> Self {
        self.read_chunk = size;
        self
    }

    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn limits(mut self, limits: FrameLimits) -> Self {
        self.limits = limits;
        self
    }

    /// `host:port` as used in log lines and errors
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        // Sockets treat a zero timeout as "no timeout" or reject it outright
        if self.timeout.is_zero() {
            return Err(ClientError::InvalidConfig("timeout must be non-zero".into()));
        }
        if self.read_chunk == 0 {
            return Err(ClientError::InvalidConfig("read chunk must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_target_local_store() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.addr(), "127.0.0.1:6379");
        assert_eq!(cfg.timeout, DEFAULT_TIMEOUT);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn overlay_applies_values() {
        let cfg = ClientConfig::default()
            .overlay(lookup(&[
                (ENV_HOST, "cache.internal"),
                (ENV_PORT, "7379"),
                (ENV_TIMEOUT_MS, "250"),
            ]))
            .unwrap();
        assert_eq!(cfg.addr(), "cache.internal:7379");
        assert_eq!(cfg.timeout, Duration::from_millis(250));
    }

    #[test]
    fn overlay_rejects_bad_values() {
        let bad_port = ClientConfig::default().overlay(lookup(&[(ENV_PORT, "70000")]));
        assert!(matches!(bad_port, Err(ClientError::InvalidConfig(_))));

        let zero_timeout = ClientConfig::default().overlay(lookup(&[(ENV_TIMEOUT_MS, "0")]));
        assert!(matches!(zero_timeout, Err(ClientError::InvalidConfig(_))));

        let empty_host = ClientConfig::default().overlay(lookup(&[(ENV_HOST, " ")]));
        assert!(matches!(empty_host, Err(ClientError::InvalidConfig(_))));
    }
}
