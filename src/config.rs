//! Server and session configuration.
//!
//! Both configurations deserialize from YAML with every key optional; missing
//! keys take the documented defaults. Durations are in milliseconds.
//!
//! ```yaml
//! bind_address: 0.0.0.0
//! portmap_port: 56577
//! chunk_size: 65536
//! memory_ceiling: 67108864
//! shutdown_timeout_ms: 5000
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::Encoding;
use crate::protocol::{DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_PORTMAP_PORT, HEADER_SIZE};
use crate::{EvwireError, Result};

/// Broadcast server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address both listeners bind to.
    pub bind_address: IpAddr,
    /// Well-known rendezvous port; `None` disables the port map listener and 0
    /// binds it to an ephemeral port.
    pub portmap_port: Option<u16>,
    /// Data port; 0 picks an ephemeral port.
    pub data_port: u16,
    /// Preferred chunk size in bytes. Larger messages get a chunk of their own.
    pub chunk_size: usize,
    /// Upper bound on bytes held in chunks.
    pub memory_ceiling: usize,
    pub max_consumers: usize,
    pub max_message_size: u32,
    /// Time allowed for consumers to drain after shutdown begins.
    pub shutdown_timeout_ms: u64,
    /// Default poll timeout for `run`.
    pub poll_interval_ms: u64,
    /// Consumers that do not send the magic within this time are dropped.
    pub handshake_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            portmap_port: Some(DEFAULT_PORTMAP_PORT),
            data_port: 0,
            chunk_size: 64 * 1024,
            memory_ceiling: 64 * 1024 * 1024,
            max_consumers: 256,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            shutdown_timeout_ms: 5_000,
            poll_interval_ms: 100,
            handshake_timeout_ms: 2_000,
        }
    }
}

impl ServerConfig {
    /// Loopback configuration on ephemeral ports, without a port map listener.
    pub fn loopback() -> Self {
        Self { bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST), portmap_port: None, ..Self::default() }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = parse_yaml(yaml, "server")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_yaml_str(&read_file(path.as_ref())?)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size < HEADER_SIZE {
            return Err(EvwireError::config(format!(
                "chunk_size {} cannot hold a message header",
                self.chunk_size
            )));
        }
        if self.memory_ceiling < self.chunk_size {
            return Err(EvwireError::config(format!(
                "memory_ceiling {} is smaller than chunk_size {}",
                self.memory_ceiling, self.chunk_size
            )));
        }
        if self.max_consumers == 0 {
            return Err(EvwireError::config("max_consumers must be at least 1"));
        }
        validate_message_size(self.max_message_size)?;
        if self.data_port != 0 && self.portmap_port == Some(self.data_port) {
            return Err(EvwireError::config("portmap_port and data_port must differ"));
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

/// How a client reaches the data port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rendezvous {
    /// Ask the well-known port for the data port first.
    #[default]
    Portmap,
    /// Connect to the given port directly.
    Direct,
}

/// Producer and consumer session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub rendezvous: Rendezvous,
    /// Width of the per-event sort key in words.
    pub sort_key_words: u32,
    /// Payload encoding used by producers.
    pub encoding: Encoding,
    pub connect_timeout_ms: u64,
    pub portmap_timeout_ms: u64,
    /// Switch the socket to non-blocking mode once setup completes.
    pub nonblocking: bool,
    /// Return [`crate::ProtocolError::Aborted`] from `fetch_event` on abort instead of closing quietly.
    pub strict_abort: bool,
    pub max_message_size: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rendezvous: Rendezvous::Portmap,
            sort_key_words: 0,
            encoding: Encoding::Plain,
            connect_timeout_ms: 5_000,
            portmap_timeout_ms: 2_000,
            nonblocking: false,
            strict_abort: false,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl SessionConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = parse_yaml(yaml, "session")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_yaml_str(&read_file(path.as_ref())?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_ms == 0 || self.portmap_timeout_ms == 0 {
            return Err(EvwireError::config("timeouts must be non-zero"));
        }
        validate_message_size(self.max_message_size)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn portmap_timeout(&self) -> Duration {
        Duration::from_millis(self.portmap_timeout_ms)
    }
}

fn validate_message_size(size: u32) -> Result<()> {
    if (size as usize) < HEADER_SIZE || size % 4 != 0 {
        return Err(EvwireError::config(format!(
            "max_message_size {} must be a multiple of 4 of at least {}",
            size, HEADER_SIZE
        )));
    }
    Ok(())
}

fn parse_yaml<T: serde::de::DeserializeOwned>(yaml: &str, what: &str) -> Result<T> {
    if yaml.trim().is_empty() {
        debug!(what, "Empty configuration, using defaults");
    }
    let source = if yaml.trim().is_empty() { "{}" } else { yaml };
    serde_yaml_ng::from_str(source)
        .map_err(|e| EvwireError::config(format!("invalid {} configuration: {}", what, e)))
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| EvwireError::config(format!("cannot read {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_gives_defaults() {
        assert_eq!(ServerConfig::from_yaml_str("").unwrap(), ServerConfig::default());
        assert_eq!(SessionConfig::from_yaml_str("  \n").unwrap(), SessionConfig::default());
    }

    #[test]
    fn partial_yaml_overrides_named_keys() {
        let config = ServerConfig::from_yaml_str(
            "bind_address: 127.0.0.1\nportmap_port: null\nchunk_size: 4096\nmemory_ceiling: 65536\n",
        )
        .unwrap();
        assert_eq!(config.bind_address, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.portmap_port, None);
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.max_consumers, 256);

        let session = SessionConfig::from_yaml_str("encoding: bits\nsort_key_words: 2\nrendezvous: direct\n").unwrap();
        assert_eq!(session.encoding, Encoding::Bits);
        assert_eq!(session.sort_key_words, 2);
        assert_eq!(session.rendezvous, Rendezvous::Direct);
    }

    #[test]
    fn inconsistent_values_are_rejected() {
        assert!(ServerConfig::from_yaml_str("chunk_size: 1048576\nmemory_ceiling: 1024\n").is_err());
        assert!(ServerConfig::from_yaml_str("max_consumers: 0\n").is_err());
        assert!(ServerConfig::from_yaml_str("unknown_key: 1\n").is_err());
        assert!(SessionConfig::from_yaml_str("max_message_size: 6\n").is_err());
    }

    #[test]
    fn durations_are_milliseconds() {
        let config = ServerConfig { shutdown_timeout_ms: 1500, ..ServerConfig::default() };
        assert_eq!(config.shutdown_timeout(), Duration::from_millis(1500));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = SessionConfig::from_file("/nonexistent/evwire.yaml").unwrap_err();
        assert!(matches!(err, EvwireError::Config { .. }));
    }
}
