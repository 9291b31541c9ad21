//! SOCKS5 connections to the bridge through the transport's local proxy

use super::Credential;
use crate::error::ConnectError;
use crate::pt::HandshakeResult;
use async_socks5::AddrKind;
use async_trait::async_trait;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Produces one ready-to-use bridge connection per call
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new connection to the bridge
    async fn connect(&self) -> Result<TcpStream, ConnectError>;

    /// Human readable description of the destination
    fn describe(&self) -> String;
}

/// Connector that goes through the transport's SOCKS5 proxy
#[derive(Debug, Clone)]
pub struct BridgeConnector {
    proxy_host: String,
    proxy_port: u16,
    credential: Credential,
    bridge_host: String,
    bridge_port: u16,
    connect_timeout: Duration,
}

impl BridgeConnector {
    /// Create a connector for the given proxy and bridge
    pub fn new(
        proxy_host: impl Into<String>,
        proxy_port: u16,
        credential: Credential,
        bridge_host: impl Into<String>,
        bridge_port: u16,
    ) -> Self {
        BridgeConnector {
            proxy_host: proxy_host.into(),
            proxy_port,
            credential,
            bridge_host: bridge_host.into(),
            bridge_port,
            connect_timeout: Duration::from_secs(crate::helper::DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    /// Create a connector for the proxy a transport announced
    pub fn from_handshake(
        handshake: &HandshakeResult,
        credential: Credential,
        bridge_host: impl Into<String>,
        bridge_port: u16,
    ) -> Self {
        Self::new(
            handshake.address.clone(),
            handshake.port,
            credential,
            bridge_host,
            bridge_port,
        )
    }

    /// Set the timeout for the whole proxy exchange
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn target(&self) -> AddrKind {
        match self.bridge_host.parse::<IpAddr>() {
            Ok(ip) => AddrKind::Ip(SocketAddr::new(ip, self.bridge_port)),
            Err(_) => AddrKind::Domain(self.bridge_host.clone(), self.bridge_port),
        }
    }

    async fn exchange(&self) -> Result<TcpStream, ConnectError> {
        let auth = self.credential.socks_auth()?;

        let mut stream = TcpStream::connect((self.proxy_host.as_str(), self.proxy_port))
            .await
            .map_err(ConnectError::ProxyUnreachable)?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY on bridge connection: {}", e);
        }

        async_socks5::connect(&mut stream, self.target(), auth)
            .await
            .map_err(classify_socks_error)?;

        Ok(stream)
    }
}

#[async_trait]
impl Connector for BridgeConnector {
    async fn connect(&self) -> Result<TcpStream, ConnectError> {
        let stream = tokio::time::timeout(self.connect_timeout, self.exchange())
            .await
            .map_err(|_| ConnectError::Timeout)??;
        debug!("Connected to bridge {}", self.describe());
        Ok(stream)
    }

    fn describe(&self) -> String {
        format!(
            "{}:{} via {}:{}",
            self.bridge_host, self.bridge_port, self.proxy_host, self.proxy_port
        )
    }
}

/// Map a SOCKS5 client failure onto the connect taxonomy
fn classify_socks_error(err: async_socks5::Error) -> ConnectError {
    match err {
        async_socks5::Error::Io(e) if is_disconnect(&e) => ConnectError::ProxyUnreachable(e),
        other => ConnectError::ProxyProtocolError(other.to_string()),
    }
}

fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}
