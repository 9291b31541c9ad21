//! Error types for ptproxy
//!
//! Each component reports its own error enum. Fatal startup errors are wrapped
//! in [`PtProxyError`], which knows the stage that failed.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to start the pluggable transport executable
#[derive(Error, Debug)]
pub enum LaunchError {
    /// The executable does not exist or cannot be executed
    #[error("transport binary not found or not executable: {path:?}: {source}")]
    BinaryNotFound {
        /// Path that was tried
        path: PathBuf,
        /// Underlying spawn error
        #[source]
        source: io::Error,
    },

    /// Spawning failed for another reason
    #[error("failed to spawn transport {path:?}: {source}")]
    Spawn {
        /// Path that was tried
        path: PathBuf,
        /// Underlying spawn error
        #[source]
        source: io::Error,
    },

    /// The temporary state directory could not be created
    #[error("failed to create transport state directory: {0}")]
    StateDir(#[source] io::Error),

    /// The spawned process did not expose the pipe we asked for
    #[error("transport {0} pipe unavailable")]
    MissingPipe(&'static str),
}

impl LaunchError {
    /// Classify a spawn failure for the given path
    pub fn from_spawn(path: PathBuf, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                LaunchError::BinaryNotFound { path, source }
            }
            _ => LaunchError::Spawn { path, source },
        }
    }
}

/// Failure in the transport's managed-proxy startup output
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// First line did not announce protocol version 1
    #[error("wrong managed transport version line: {line:?}")]
    WrongVersion {
        /// The offending line
        line: String,
    },

    /// Second line is not a well-formed method line
    #[error("malformed method line: {line:?}")]
    MalformedMethodLine {
        /// The offending line
        line: String,
    },

    /// Transport speaks something other than socks5
    #[error("unsupported proxy protocol {protocol:?}, only socks5 is supported")]
    UnsupportedProtocol {
        /// Protocol announced by the transport
        protocol: String,
    },

    /// Transport announced a different transport name
    #[error("transport mismatch: expected {expected:?}, transport reported {found:?}")]
    TransportMismatch {
        /// Configured transport name
        expected: String,
        /// Name the transport announced
        found: String,
    },

    /// The two lines did not arrive in time
    #[error("timed out waiting for transport handshake")]
    Timeout,

    /// Output closed before two lines were read
    #[error("transport output closed during handshake")]
    Closed,

    /// Reading the output failed
    #[error("failed to read transport output: {0}")]
    Io(#[from] io::Error),
}

/// Failure to open a connection to the bridge through the local proxy
#[derive(Error, Debug)]
pub enum ConnectError {
    /// Local SOCKS endpoint refused, reset or closed the connection
    #[error("transport proxy unreachable: {0}")]
    ProxyUnreachable(#[source] io::Error),

    /// SOCKS5 negotiation failed or the reply was malformed
    #[error("SOCKS5 negotiation with transport proxy failed: {0}")]
    ProxyProtocolError(String),

    /// Whole exchange exceeded the connect timeout
    #[error("timed out connecting to bridge through transport proxy")]
    Timeout,

    /// Credential does not fit in the SOCKS5 username and password fields
    #[error("bridge credential is {0} bytes, at most 510 fit in SOCKS5 auth")]
    CredentialTooLong(usize),
}

impl ConnectError {
    /// Whether the failure points at the transport process rather than the bridge
    pub fn is_proxy_unreachable(&self) -> bool {
        matches!(self, ConnectError::ProxyUnreachable(_))
    }
}

/// Stage-tagged fatal error for the whole instance
#[derive(Error, Debug)]
pub enum PtProxyError {
    /// Configuration was rejected
    #[error("config: {0}")]
    Config(String),

    /// Transport could not be launched
    #[error("launch: {0}")]
    Launch(#[from] LaunchError),

    /// Transport handshake failed
    #[error("handshake: {0}")]
    Handshake(#[from] HandshakeError),

    /// Initial bridge probe failed
    #[error("initial connect: {0}")]
    Connect(#[from] ConnectError),

    /// Local listener could not be bound or failed
    #[error("listen: {0}")]
    Listen(#[source] io::Error),

    /// Transport process exited while it was needed
    #[error("transport: exited unexpectedly ({0})")]
    TransportExited(String),
}

impl PtProxyError {
    /// Name of the stage that failed
    pub fn stage(&self) -> &'static str {
        match self {
            PtProxyError::Config(_) => "config",
            PtProxyError::Launch(_) => "launch",
            PtProxyError::Handshake(_) => "handshake",
            PtProxyError::Connect(_) => "initial connect",
            PtProxyError::Listen(_) => "listen",
            PtProxyError::TransportExited(_) => "transport",
        }
    }
}
