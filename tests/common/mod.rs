//! Test utilities for ptproxy
//!
//! This module provides a small SOCKS5 server standing in for a transport's
//! local proxy, echo bridges and a few TCP helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use ptproxy::bridge::Connector;
use ptproxy::error::ConnectError;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Create a test TCP listener on an available port
pub async fn create_test_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Start a bridge that echoes everything back
pub async fn spawn_echo_bridge() -> SocketAddr {
    let (listener, addr) = create_test_listener().await;
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

/// Poll `cond` until it holds or two seconds pass
pub async fn wait_for<F: Fn() -> bool>(cond: F) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

/// Username and password a SOCKS5 client authenticated with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedAuth {
    pub username: Vec<u8>,
    pub password: Vec<u8>,
}

/// Minimal SOCKS5 server with RFC 1929 authentication
///
/// Accepts every credential, records it and connects to the requested target.
pub struct TestSocksServer {
    pub addr: SocketAddr,
    auths: Arc<Mutex<Vec<RecordedAuth>>>,
    targets: Arc<Mutex<Vec<String>>>,
}

impl TestSocksServer {
    /// Start the server on an ephemeral port
    pub async fn start() -> Self {
        let (listener, addr) = create_test_listener().await;
        let auths = Arc::new(Mutex::new(Vec::new()));
        let targets = Arc::new(Mutex::new(Vec::new()));

        let (auths_task, targets_task) = (auths.clone(), targets.clone());
        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                let auths = auths_task.clone();
                let targets = targets_task.clone();
                tokio::spawn(async move {
                    let _ = serve_socks(stream, auths, targets).await;
                });
            }
        });

        TestSocksServer {
            addr,
            auths,
            targets,
        }
    }

    /// Credentials seen so far
    pub fn auths(&self) -> Vec<RecordedAuth> {
        self.auths.lock().unwrap().clone()
    }

    /// Connect targets requested so far, as `host:port`
    pub fn targets(&self) -> Vec<String> {
        self.targets.lock().unwrap().clone()
    }
}

async fn serve_socks(
    mut stream: TcpStream,
    auths: Arc<Mutex<Vec<RecordedAuth>>>,
    targets: Arc<Mutex<Vec<String>>>,
) -> std::io::Result<()> {
    // Greeting
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).await?;
    let mut methods = vec![0u8; head[1] as usize];
    stream.read_exact(&mut methods).await?;

    if methods.contains(&0x02) {
        stream.write_all(&[0x05, 0x02]).await?;

        let mut head = [0u8; 2];
        stream.read_exact(&mut head).await?;
        let mut username = vec![0u8; head[1] as usize];
        stream.read_exact(&mut username).await?;
        let mut plen = [0u8; 1];
        stream.read_exact(&mut plen).await?;
        let mut password = vec![0u8; plen[0] as usize];
        stream.read_exact(&mut password).await?;

        auths
            .lock()
            .unwrap()
            .push(RecordedAuth { username, password });
        stream.write_all(&[0x01, 0x00]).await?;
    } else {
        stream.write_all(&[0x05, 0x00]).await?;
    }

    // CONNECT request
    let mut request = [0u8; 4];
    stream.read_exact(&mut request).await?;
    let host = match request[3] {
        0x01 => {
            let mut ip = [0u8; 4];
            stream.read_exact(&mut ip).await?;
            Ipv4Addr::from(ip).to_string()
        }
        0x04 => {
            let mut ip = [0u8; 16];
            stream.read_exact(&mut ip).await?;
            format!("[{}]", Ipv6Addr::from(ip))
        }
        _ => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            stream.read_exact(&mut name).await?;
            String::from_utf8_lossy(&name).into_owned()
        }
    };
    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await?;
    let target = format!("{}:{}", host, u16::from_be_bytes(port));
    targets.lock().unwrap().push(target.clone());

    let mut upstream = match TcpStream::connect(&target).await {
        Ok(upstream) => upstream,
        Err(e) => {
            // Connection refused
            stream
                .write_all(&[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await?;
            return Err(e);
        }
    };
    stream
        .write_all(&[0x05, 0x00, 0x00, 0x01, 127, 0, 0, 1, 0, 0])
        .await?;

    tokio::io::copy_bidirectional(&mut stream, &mut upstream).await?;
    Ok(())
}

/// Connects straight to a target, failing the first `fail_first` calls
pub struct DirectConnector {
    pub addr: SocketAddr,
    pub fail_first: usize,
    pub fail_delay: Duration,
    pub calls: AtomicUsize,
}

impl DirectConnector {
    pub fn new(addr: SocketAddr) -> Self {
        Self::failing(addr, 0)
    }

    pub fn failing(addr: SocketAddr, fail_first: usize) -> Self {
        DirectConnector {
            addr,
            fail_first,
            fail_delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Let failing calls take `delay` before they report the failure
    pub fn with_failure_delay(mut self, delay: Duration) -> Self {
        self.fail_delay = delay;
        self
    }
}

#[async_trait]
impl Connector for DirectConnector {
    async fn connect(&self) -> Result<TcpStream, ConnectError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            tokio::time::sleep(self.fail_delay).await;
            return Err(ConnectError::ProxyProtocolError(
                "general SOCKS server failure".to_string(),
            ));
        }
        TcpStream::connect(self.addr)
            .await
            .map_err(ConnectError::ProxyUnreachable)
    }

    fn describe(&self) -> String {
        self.addr.to_string()
    }
}
