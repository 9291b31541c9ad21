//! Pluggable transport configuration
//!
//! Describes the transport executable and how it is launched.

use crate::helper::DEFAULT_HANDSHAKE_TIMEOUT_SECS;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default transport name
fn default_transport_name() -> String {
    "obfs4".to_string()
}

/// Default handshake timeout in seconds
fn default_handshake_timeout() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT_SECS
}

/// Pluggable transport configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TransportConfig {
    /// Path to the transport executable (e.g. "/usr/bin/obfs4proxy")
    pub binary: PathBuf,

    /// Transport name (e.g. "obfs4")
    #[serde(default = "default_transport_name")]
    pub name: String,

    /// Extra command line arguments for the executable
    #[serde(default)]
    pub args: Vec<String>,

    /// Directory where the transport keeps its state
    ///
    /// Client mode uses a temporary directory when unset.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    /// Ask the transport to exit when its stdin is closed
    #[serde(default)]
    pub exit_on_stdin_close: bool,

    /// Handshake timeout in seconds
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: u64,
}

impl TransportConfig {
    /// Create a configuration with defaults for the given binary
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        TransportConfig {
            binary: binary.into(),
            name: default_transport_name(),
            args: Vec::new(),
            state_dir: None,
            exit_on_stdin_close: false,
            handshake_timeout: default_handshake_timeout(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.binary.as_os_str().is_empty() {
            return Err("transport.binary must not be empty".to_string());
        }
        if self.name.is_empty() || self.name.contains(char::is_whitespace) {
            return Err(format!("invalid transport name: {:?}", self.name));
        }
        if self.handshake_timeout == 0 {
            return Err("transport.handshake_timeout must be positive".to_string());
        }
        Ok(())
    }
}
