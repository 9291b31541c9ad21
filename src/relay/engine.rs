//! Session relay event loop
//!
//! A single task accepts local clients, waits for their bridge connections and
//! moves bytes for every active session. Each cycle services a snapshot of the
//! sockets that were ready; sessions that fail during the cycle are removed
//! after the snapshot has been processed and before the next wait.
//!
//! Forwarding never waits on a peer. A write the peer cannot take right away
//! tears that session down, so one stalled peer cannot hold up the others.

use super::session::{ReadyEvent, SessionError, SessionId, SessionSet};
use super::stats::RelayStats;
use crate::bridge::Connector;
use crate::error::{ConnectError, PtProxyError};
use crate::helper::{clamp_chunk_size, DEFAULT_CHUNK_SIZE};
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Relay tuning
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Maximum bytes moved per read
    pub chunk_size: usize,
}

impl Default for RelayOptions {
    fn default() -> Self {
        RelayOptions {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Client waiting for its bridge connection
struct Connected {
    client: TcpStream,
    client_addr: SocketAddr,
    bridge: Result<TcpStream, ConnectError>,
}

type PendingConnect = Pin<Box<dyn Future<Output = Connected> + Send>>;

/// Relay between local clients and the bridge
pub struct RelayEngine<C: Connector> {
    listener: TcpListener,
    connector: Arc<C>,
    sessions: SessionSet,
    pending: FuturesUnordered<PendingConnect>,
    stats: Arc<RelayStats>,
    buf: Vec<u8>,
}

impl<C: Connector + 'static> RelayEngine<C> {
    /// Bind the local listener
    pub async fn bind(
        listen_addr: &str,
        connector: C,
        options: RelayOptions,
    ) -> Result<Self, PtProxyError> {
        let listener = TcpListener::bind(listen_addr)
            .await
            .map_err(PtProxyError::Listen)?;
        Ok(Self::from_listener(listener, connector, options))
    }

    /// Use an already bound listener
    pub fn from_listener(listener: TcpListener, connector: C, mut options: RelayOptions) -> Self {
        options.chunk_size = clamp_chunk_size(options.chunk_size);
        RelayEngine {
            listener,
            connector: Arc::new(connector),
            sessions: SessionSet::new(),
            pending: FuturesUnordered::new(),
            stats: Arc::new(RelayStats::new()),
            buf: vec![0u8; options.chunk_size],
        }
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared statistics handle
    pub fn stats(&self) -> Arc<RelayStats> {
        self.stats.clone()
    }

    /// Run until `shutdown_rx` fires or the listener fails
    ///
    /// Shutdown is abrupt: every session is closed without draining.
    pub async fn run(
        mut self,
        mut shutdown_rx: broadcast::Receiver<bool>,
    ) -> Result<(), PtProxyError> {
        if let Ok(addr) = self.listener.local_addr() {
            info!(
                "Relay listening on {} (point your application at it), bridge {}",
                addr,
                self.connector.describe()
            );
        }

        let result = loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping relay");
                    break Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.on_accept(stream, addr),
                    Err(e) if is_per_connection_error(&e) => {
                        debug!("Accept aborted by client: {}", e);
                    }
                    Err(e) => {
                        error!("Listener failed: {}", e);
                        break Err(PtProxyError::Listen(e));
                    }
                },
                Some(connected) = self.pending.next(), if !self.pending.is_empty() => {
                    self.on_connected(connected);
                }
                Some(event) = self.sessions.next_ready(), if !self.sessions.is_empty() => {
                    self.service(event);
                }
            }
        };

        self.close_all();
        result
    }

    fn on_accept(&mut self, client: TcpStream, client_addr: SocketAddr) {
        self.stats.record_accepted();
        info!("Connection opened from {}", client_addr);
        if let Err(e) = client.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", client_addr, e);
        }

        let connector = self.connector.clone();
        self.pending.push(Box::pin(async move {
            let bridge = connector.connect().await;
            Connected {
                client,
                client_addr,
                bridge,
            }
        }));
    }

    fn on_connected(&mut self, connected: Connected) {
        let Connected {
            client,
            client_addr,
            bridge,
        } = connected;

        match bridge {
            Ok(bridge) => {
                let id = self.sessions.insert(client, bridge, client_addr);
                self.stats.record_established();
                info!("Session {} established for {}", id, client_addr);
            }
            Err(e) => {
                self.stats.record_connect_failure();
                if e.is_proxy_unreachable() {
                    error!(
                        "Bridge connect for {} failed, transport may have exited: {}",
                        client_addr, e
                    );
                } else {
                    warn!("Bridge connect for {} failed: {}", client_addr, e);
                }
                // Dropping the client closes it
                drop(client);
            }
        }
    }

    /// Service every socket ready in this cycle, then apply teardowns
    fn service(&mut self, first: ReadyEvent) {
        let ready = self.sessions.snapshot(first);
        let mut closing: Vec<(SessionId, SessionError)> = Vec::new();

        for event in ready {
            if closing.iter().any(|(id, _)| *id == event.id) {
                continue;
            }
            if let Err((id, reason)) = self.forward(event) {
                closing.push((id, reason));
            }
        }

        for (id, reason) in closing {
            self.teardown(id, reason);
        }
    }

    /// Move one chunk from the ready socket to its peer
    fn forward(&mut self, event: ReadyEvent) -> Result<(), (SessionId, SessionError)> {
        let ReadyEvent { id, side, result } = event;
        let (src, dst) = match self.sessions.get(id) {
            Some(session) => session.route(side),
            None => return Ok(()),
        };

        if let Err(e) = result {
            return Err((id, SessionError::Read(side, e)));
        }

        let n = match src.try_read(&mut self.buf) {
            Ok(0) => return Err((id, SessionError::PeerClosed(side))),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) => return Err((id, SessionError::Read(side, e))),
        };

        write_now(&dst, &self.buf[..n]).map_err(|e| (id, SessionError::Write(side.peer(), e)))
    }

    fn teardown(&mut self, id: SessionId, reason: SessionError) {
        if let Some(session) = self.sessions.remove(id) {
            self.stats.record_closed();
            let (id, client_addr, age) = (session.id(), session.client_addr(), session.age());
            drop(session);
            match reason {
                SessionError::PeerClosed(_) => {
                    info!("Session {} for {} closed after {:?}: {}", id, client_addr, age, reason)
                }
                _ => debug!(
                    "Session {} for {} torn down after {:?}: {}",
                    id, client_addr, age, reason
                ),
            }
        }
    }

    fn close_all(&mut self) {
        let pending = self.pending.len();
        self.pending = FuturesUnordered::new();
        let closed = self.sessions.clear();
        for _ in 0..closed {
            self.stats.record_closed();
        }
        if closed > 0 || pending > 0 {
            info!("Closed {} active and {} pending sessions", closed, pending);
        }
        self.stats.log_summary();
    }
}

/// Write everything the socket accepts right now
///
/// Fails if the peer's buffer cannot take the whole chunk.
fn write_now(stream: &TcpStream, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        match stream.try_write(data) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                return Err(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    "peer is not draining",
                ));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Accept errors that concern one incoming connection only
fn is_per_connection_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
