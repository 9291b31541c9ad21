//! Top-level and role configuration types
//!
//! A configuration runs the transport either in client role (local relay to a
//! bridge) or in server role (transport faces the network and forwards to a
//! local ORPort).

use super::TransportConfig;
use crate::helper::{
    DEFAULT_CHUNK_SIZE, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_LISTEN_ADDR, MAX_CHUNK_SIZE,
    MIN_CHUNK_SIZE,
};
use serde::{Deserialize, Serialize};

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_probe_bridge() -> bool {
    true
}

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Transport executable configuration
    pub transport: TransportConfig,

    /// Client role configuration
    #[serde(default)]
    pub client: Option<ClientConfig>,

    /// Server role configuration
    #[serde(default)]
    pub server: Option<ServerConfig>,
}

/// Role selected by a configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Local relay to a bridge
    Client,
    /// Network-facing transport
    Server,
}

impl Config {
    /// Role this configuration runs in
    pub fn mode(&self) -> Result<Mode, String> {
        match (&self.client, &self.server) {
            (Some(_), None) => Ok(Mode::Client),
            (None, Some(_)) => Ok(Mode::Server),
            (Some(_), Some(_)) => Err("only one of [client] or [server] may be set".to_string()),
            (None, None) => Err("one of [client] or [server] must be set".to_string()),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        self.transport.validate()?;
        match self.mode()? {
            Mode::Client => self.client.as_ref().map_or(Ok(()), ClientConfig::validate),
            Mode::Server => {
                if self.transport.state_dir.is_none() {
                    return Err("server mode requires transport.state_dir".to_string());
                }
                self.server.as_ref().map_or(Ok(()), ServerConfig::validate)
            }
        }
    }
}

/// Client role configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClientConfig {
    /// Local address applications connect to (port 0 picks an ephemeral port)
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Remote bridge address (e.g. "1.2.3.4:443")
    pub bridge: String,

    /// Bridge credential passed to the transport (e.g. "cert=...;iat-mode=0")
    #[serde(default)]
    pub credential: String,

    /// Bridge connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Maximum bytes relayed per read
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Open one bridge connection at startup and fail fast if it does not work
    #[serde(default = "default_probe_bridge")]
    pub probe_bridge: bool,
}

impl ClientConfig {
    /// Create a client configuration with defaults for the given bridge
    pub fn new(bridge: impl Into<String>, credential: impl Into<String>) -> Self {
        ClientConfig {
            listen_addr: default_listen_addr(),
            bridge: bridge.into(),
            credential: credential.into(),
            connect_timeout: default_connect_timeout(),
            chunk_size: default_chunk_size(),
            probe_bridge: default_probe_bridge(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        crate::helper::split_host_port(&self.bridge)
            .map_err(|e| format!("client.bridge: {}", e))?;
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(format!(
                "client.chunk_size must be between {} and {}",
                MIN_CHUNK_SIZE, MAX_CHUNK_SIZE
            ));
        }
        if self.connect_timeout == 0 {
            return Err("client.connect_timeout must be positive".to_string());
        }
        Ok(())
    }
}

/// Server role configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// Address the transport binds to (e.g. "0.0.0.0:443")
    pub bind: String,

    /// Local service the transport forwards to (e.g. "127.0.0.1:8080")
    pub orport: String,
}

impl ServerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        crate::helper::split_host_port(&self.bind).map_err(|e| format!("server.bind: {}", e))?;
        crate::helper::split_host_port(&self.orport)
            .map_err(|e| format!("server.orport: {}", e))?;
        Ok(())
    }
}
