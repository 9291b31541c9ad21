//! Managed transport handshake parsing
//!
//! A transport announces itself on stdout with two lines:
//!
//! ```text
//! VERSION 1
//! CMETHOD obfs4 socks5 127.0.0.1:41000
//! ```
//!
//! Server-role transports announce `SMETHOD <transport> <address>:<port>`
//! instead of the CMETHOD line.

use crate::error::HandshakeError;
use crate::helper::split_host_port;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tracing::debug;

/// Managed transport protocol version we speak
pub const MANAGED_TRANSPORT_VERSION: &str = "1";

/// The only proxy protocol the relay can use
pub const SUPPORTED_PROTOCOL: &str = "socks5";

/// Longest handshake line accepted, newline included
pub const MAX_LINE_LEN: usize = 1024;

/// Client-role handshake outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    /// Transport name announced by the transport
    pub transport_name: String,
    /// Proxy protocol, always "socks5"
    pub protocol: String,
    /// Address of the local proxy
    pub address: String,
    /// Port of the local proxy
    pub port: u16,
}

impl HandshakeResult {
    /// "address:port" form of the proxy endpoint, bracketing IPv6 literals
    pub fn endpoint(&self) -> String {
        if self.address.contains(':') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

/// Server-role handshake outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHandshake {
    /// Transport name announced by the transport
    pub transport_name: String,
    /// Address the transport listens on
    pub address: String,
    /// Port the transport listens on
    pub port: u16,
}

/// Read the client-role handshake
///
/// Reads exactly two lines and fails with the specific error for the first
/// grammar clause that does not hold.
pub async fn read_handshake<R>(
    reader: &mut R,
    expected_transport: &str,
    timeout: Duration,
) -> Result<HandshakeResult, HandshakeError>
where
    R: AsyncBufRead + Unpin,
{
    let (version, method) = read_two_lines(reader, timeout).await?;
    parse_version_line(&version)?;
    let result = parse_method_line(&method, expected_transport)?;
    debug!(
        "Transport {} announced {} proxy on {}",
        result.transport_name,
        result.protocol,
        result.endpoint()
    );
    Ok(result)
}

/// Read the server-role handshake
pub async fn read_server_handshake<R>(
    reader: &mut R,
    expected_transport: &str,
    timeout: Duration,
) -> Result<ServerHandshake, HandshakeError>
where
    R: AsyncBufRead + Unpin,
{
    let (version, method) = read_two_lines(reader, timeout).await?;
    parse_version_line(&version)?;
    parse_server_method_line(&method, expected_transport)
}

async fn read_two_lines<R>(reader: &mut R, timeout: Duration) -> Result<(String, String), HandshakeError>
where
    R: AsyncBufRead + Unpin,
{
    let read = async {
        let first = read_line(reader, |line| HandshakeError::WrongVersion { line }).await?;
        let second =
            read_line(reader, |line| HandshakeError::MalformedMethodLine { line }).await?;
        Ok::<_, HandshakeError>((first, second))
    };

    tokio::time::timeout(timeout, read)
        .await
        .map_err(|_| HandshakeError::Timeout)?
}

async fn read_line<R>(
    reader: &mut R,
    overlong: fn(String) -> HandshakeError,
) -> Result<String, HandshakeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let mut limited = (&mut *reader).take(MAX_LINE_LEN as u64);
    let n = limited.read_until(b'\n', &mut buf).await?;
    if buf.last() != Some(&b'\n') {
        if n >= MAX_LINE_LEN {
            return Err(overlong(String::from_utf8_lossy(&buf).into_owned()));
        }
        // A line without its newline means the stream ended mid-line
        return Err(HandshakeError::Closed);
    }
    let line = String::from_utf8_lossy(&buf);
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Check the `VERSION 1` line
pub fn parse_version_line(line: &str) -> Result<(), HandshakeError> {
    let mut tokens = line.split_whitespace();
    match (tokens.next(), tokens.next(), tokens.next()) {
        (Some("VERSION"), Some(MANAGED_TRANSPORT_VERSION), None) => Ok(()),
        _ => Err(HandshakeError::WrongVersion {
            line: line.to_string(),
        }),
    }
}

/// Parse a `CMETHOD <transport> <protocol> <address>:<port>` line
pub fn parse_method_line(
    line: &str,
    expected_transport: &str,
) -> Result<HandshakeResult, HandshakeError> {
    let malformed = || HandshakeError::MalformedMethodLine {
        line: line.to_string(),
    };

    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("CMETHOD") {
        return Err(malformed());
    }
    let transport_name = tokens.next().ok_or_else(malformed)?;
    let protocol = tokens.next().ok_or_else(malformed)?;
    let endpoint = tokens.next().ok_or_else(malformed)?;
    if !tokens.all(is_option_token) {
        return Err(malformed());
    }
    let (address, port) = split_host_port(endpoint).map_err(|_| malformed())?;

    if protocol != SUPPORTED_PROTOCOL {
        return Err(HandshakeError::UnsupportedProtocol {
            protocol: protocol.to_string(),
        });
    }
    if transport_name != expected_transport {
        return Err(HandshakeError::TransportMismatch {
            expected: expected_transport.to_string(),
            found: transport_name.to_string(),
        });
    }

    Ok(HandshakeResult {
        transport_name: transport_name.to_string(),
        protocol: protocol.to_string(),
        address,
        port,
    })
}

/// Parse a `SMETHOD <transport> <address>:<port>` line
pub fn parse_server_method_line(
    line: &str,
    expected_transport: &str,
) -> Result<ServerHandshake, HandshakeError> {
    let malformed = || HandshakeError::MalformedMethodLine {
        line: line.to_string(),
    };

    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("SMETHOD") {
        return Err(malformed());
    }
    let transport_name = tokens.next().ok_or_else(malformed)?;
    let endpoint = tokens.next().ok_or_else(malformed)?;
    if !tokens.all(is_option_token) {
        return Err(malformed());
    }
    let (address, port) = split_host_port(endpoint).map_err(|_| malformed())?;

    if transport_name != expected_transport {
        return Err(HandshakeError::TransportMismatch {
            expected: expected_transport.to_string(),
            found: transport_name.to_string(),
        });
    }

    Ok(ServerHandshake {
        transport_name: transport_name.to_string(),
        address,
        port,
    })
}

fn is_option_token(token: &str) -> bool {
    token.starts_with("ARGS:") || token.starts_with("OPT-ARGS:")
}
