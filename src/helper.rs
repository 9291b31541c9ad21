//! Helper utilities for ptproxy
//!
//! Shared defaults and small parsing helpers.

use std::time::Duration;

/// Default relay chunk size per read
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Smallest accepted relay chunk size
pub const MIN_CHUNK_SIZE: usize = 512;

/// Largest accepted relay chunk size
pub const MAX_CHUNK_SIZE: usize = 65536;

/// Default bridge connect timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default transport handshake timeout in seconds
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 15;

/// Default local listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:9999";

/// Parse duration from seconds
pub fn duration_from_secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}

/// Split "host:port" into its parts
///
/// Accepts bracketed IPv6 literals ("[::1]:443"); the brackets are removed.
pub fn split_host_port(addr: &str) -> Result<(String, u16), String> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| format!("missing port in {:?}", addr))?;

    let host = match host.strip_prefix('[') {
        Some(inner) => inner
            .strip_suffix(']')
            .ok_or_else(|| format!("unterminated IPv6 literal in {:?}", addr))?,
        None if host.contains(':') => {
            return Err(format!("IPv6 literal must be bracketed in {:?}", addr))
        }
        None => host,
    };

    if host.is_empty() {
        return Err(format!("missing host in {:?}", addr));
    }

    let port = port
        .parse::<u16>()
        .map_err(|_| format!("invalid port in {:?}", addr))?;

    Ok((host.to_string(), port))
}

/// Clamp a configured chunk size into the accepted range
pub fn clamp_chunk_size(size: usize) -> usize {
    size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
}
