//! Active session bookkeeping
//!
//! [`SessionSet`] owns every relaying session together with the readiness
//! watches for both of its sockets. A session and its two watches are only
//! ever added or removed together.

use futures::stream::{self, Stream, StreamExt};
use futures::FutureExt;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_stream::StreamMap;

/// Stable identifier of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One half of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Local application connection
    Client,
    /// Connection through the transport to the bridge
    Bridge,
}

impl Side {
    /// The other half
    pub fn peer(self) -> Side {
        match self {
            Side::Client => Side::Bridge,
            Side::Bridge => Side::Client,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Client => write!(f, "client"),
            Side::Bridge => write!(f, "bridge"),
        }
    }
}

/// Why a session ended
#[derive(Error, Debug)]
pub enum SessionError {
    /// Peer closed its write side
    #[error("{0} closed the connection")]
    PeerClosed(Side),

    /// Reading failed (e.g. reset)
    #[error("read from {0} failed: {1}")]
    Read(Side, #[source] io::Error),

    /// Writing failed or could not complete in time
    #[error("write to {0} failed: {1}")]
    Write(Side, #[source] io::Error),
}

/// A relaying (client, bridge) pair
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    client: Arc<TcpStream>,
    bridge: Arc<TcpStream>,
    client_addr: SocketAddr,
    created: Instant,
}

impl Session {
    /// Session identifier
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Address of the local application
    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// Time since the session was registered
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// The socket on `side` and the one it forwards to
    pub fn route(&self, side: Side) -> (Arc<TcpStream>, Arc<TcpStream>) {
        match side {
            Side::Client => (self.client.clone(), self.bridge.clone()),
            Side::Bridge => (self.bridge.clone(), self.client.clone()),
        }
    }
}

/// Readiness notification for one socket of one session
#[derive(Debug)]
pub struct ReadyEvent {
    /// Session the socket belongs to
    pub id: SessionId,
    /// Which socket became readable
    pub side: Side,
    /// Readiness result, an error means the socket is unusable
    pub result: io::Result<()>,
}

type Readiness = Pin<Box<dyn Stream<Item = io::Result<()>> + Send>>;

/// Yields every time the socket becomes readable
fn readiness(stream: Arc<TcpStream>) -> Readiness {
    Box::pin(stream::unfold(stream, |stream| async move {
        let result = stream.readable().await;
        Some((result, stream))
    }))
}

/// Active sessions plus their readiness watches
pub struct SessionSet {
    sessions: HashMap<SessionId, Session>,
    watch: StreamMap<(SessionId, Side), Readiness>,
    next_id: u64,
}

impl fmt::Debug for SessionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSet")
            .field("sessions", &self.sessions.len())
            .field("watched", &self.watch.len())
            .finish()
    }
}

impl Default for SessionSet {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionSet {
    /// Create an empty set
    pub fn new() -> Self {
        SessionSet {
            sessions: HashMap::new(),
            watch: StreamMap::new(),
            next_id: 0,
        }
    }

    /// Register a pair and start watching both sockets
    pub fn insert(
        &mut self,
        client: TcpStream,
        bridge: TcpStream,
        client_addr: SocketAddr,
    ) -> SessionId {
        self.next_id += 1;
        let id = SessionId(self.next_id);

        let client = Arc::new(client);
        let bridge = Arc::new(bridge);
        self.watch.insert((id, Side::Client), readiness(client.clone()));
        self.watch.insert((id, Side::Bridge), readiness(bridge.clone()));
        self.sessions.insert(
            id,
            Session {
                id,
                client,
                bridge,
                client_addr,
                created: Instant::now(),
            },
        );

        id
    }

    /// Stop watching a session and hand it back
    ///
    /// Both sockets close when the returned session is dropped.
    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        self.watch.remove(&(id, Side::Client));
        self.watch.remove(&(id, Side::Bridge));
        self.sessions.remove(&id)
    }

    /// Look up a session
    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Whether the session is registered
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Number of sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether there are no sessions
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of watched sockets, always twice the session count
    pub fn watched(&self) -> usize {
        self.watch.len()
    }

    /// Wait for the next readable socket
    pub async fn next_ready(&mut self) -> Option<ReadyEvent> {
        self.watch
            .next()
            .await
            .map(|((id, side), result)| ReadyEvent { id, side, result })
    }

    /// Collect the first event plus every other socket ready right now
    ///
    /// Each socket appears at most once in the returned snapshot.
    pub fn snapshot(&mut self, first: ReadyEvent) -> Vec<ReadyEvent> {
        let limit = self.watch.len();
        let mut ready = vec![first];

        for _ in 1..limit {
            match self.watch.next().now_or_never().flatten() {
                Some(((id, side), result)) => {
                    if ready.iter().any(|e| e.id == id && e.side == side) {
                        continue;
                    }
                    ready.push(ReadyEvent { id, side, result });
                }
                None => break,
            }
        }

        ready
    }

    /// Drop every session, returning how many there were
    pub fn clear(&mut self) -> usize {
        let count = self.sessions.len();
        self.watch = StreamMap::new();
        self.sessions.clear();
        count
    }
}
