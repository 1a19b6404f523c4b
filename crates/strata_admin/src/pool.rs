//! Destination-keyed socket pool for admin connections.
//!
//! Every RPC borrows a connection with `checkout` and returns it exactly
//! once, on success and on failure alike. Connections that saw an i/o
//! failure are invalidated so checkin discards them instead of parking
//! them; dropping a borrowed connection without checkin (an abandoned
//! stream) releases its capacity and counts as a discard, so the pool
//! stays balanced either way.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use prost::Message;
use tokio::io::BufStream;
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time;

use crate::config::AdminClientConfig;
use crate::error::AdminError;
use crate::framing;

/// Wire protocol spoken on a pooled connection. Admin traffic never
/// shares sockets with data-plane traffic to the same host and port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProtocolTag {
    Data,
    Admin,
}

/// Where a pooled connection goes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Destination {
    pub host: String,
    pub port: u16,
    pub protocol: ProtocolTag,
}

impl Destination {
    pub fn admin(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            protocol: ProtocolTag::Admin,
        }
    }

    /// `host:port` form used in error messages.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Point-in-time pool counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections currently checked out.
    pub in_use: u64,
    /// Connections parked for reuse.
    pub idle: u64,
    /// Fresh dials performed.
    pub created: u64,
    /// Checkouts served from the idle set.
    pub reused: u64,
    /// Connections dropped instead of parked.
    pub discarded: u64,
}

#[derive(Default)]
struct PoolCounters {
    created: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
    in_use: AtomicU64,
}

#[derive(Default)]
struct PoolState {
    idle: HashMap<Destination, Vec<BufStream<TcpStream>>>,
    caps: HashMap<Destination, Arc<Semaphore>>,
}

struct PoolShared {
    max_per_node: usize,
    connect_timeout: Duration,
    io_timeout: Duration,
    buffer_size: usize,
    keep_alive: bool,
    closed: AtomicBool,
    counters: PoolCounters,
    state: Mutex<PoolState>,
}

/// Pool of admin connections, keyed by destination.
#[derive(Clone)]
pub struct SocketPool {
    shared: Arc<PoolShared>,
}

impl SocketPool {
    pub fn new(config: &AdminClientConfig) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                max_per_node: config.max_connections_per_node.max(1),
                connect_timeout: config.connection_timeout,
                io_timeout: config.socket_timeout,
                buffer_size: config.socket_buffer_size.max(1),
                keep_alive: config.socket_keep_alive,
                closed: AtomicBool::new(false),
                counters: PoolCounters::default(),
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    /// Borrow a connection to `dest`, dialing if the idle set is empty.
    /// Bounded by the connect timeout, which covers both the wait for
    /// per-node capacity and the TCP connect.
    pub async fn checkout(&self, dest: &Destination) -> Result<PooledStream, AdminError> {
        let shared = &self.shared;
        if shared.closed.load(Ordering::Acquire) {
            return Err(AdminError::PoolClosed);
        }

        let semaphore = {
            let mut state = shared.state.lock().expect("pool state lock poisoned");
            state
                .caps
                .entry(dest.clone())
                .or_insert_with(|| Arc::new(Semaphore::new(shared.max_per_node)))
                .clone()
        };
        let permit = match time::timeout(shared.connect_timeout, semaphore.acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(AdminError::PoolClosed),
            Err(_) => {
                return Err(AdminError::Connect {
                    addr: dest.addr(),
                    source: io::Error::new(
                        io::ErrorKind::TimedOut,
                        "timed out waiting for per-node connection capacity",
                    ),
                })
            }
        };
        if shared.closed.load(Ordering::Acquire) {
            return Err(AdminError::PoolClosed);
        }

        // Prefer a parked connection; a dead one falls through to a dial.
        let parked = {
            let mut state = shared.state.lock().expect("pool state lock poisoned");
            state.idle.get_mut(dest).and_then(Vec::pop)
        };
        if let Some(stream) = parked {
            match stream.get_ref().peer_addr() {
                Ok(peer) => {
                    shared.counters.reused.fetch_add(1, Ordering::Relaxed);
                    shared.counters.in_use.fetch_add(1, Ordering::Relaxed);
                    return Ok(PooledStream::new(self, dest.clone(), peer, stream, permit));
                }
                Err(_) => {
                    shared.counters.discarded.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        let (stream, peer) = self.connect(dest).await?;
        shared.counters.created.fetch_add(1, Ordering::Relaxed);
        shared.counters.in_use.fetch_add(1, Ordering::Relaxed);
        Ok(PooledStream::new(self, dest.clone(), peer, stream, permit))
    }

    async fn connect(
        &self,
        dest: &Destination,
    ) -> Result<(BufStream<TcpStream>, SocketAddr), AdminError> {
        let shared = &self.shared;
        let connect_err = |source: io::Error| AdminError::Connect {
            addr: dest.addr(),
            source,
        };
        let timeout_err = || {
            connect_err(io::Error::new(
                io::ErrorKind::TimedOut,
                "connect timed out",
            ))
        };

        let addr = time::timeout(
            shared.connect_timeout,
            lookup_host((dest.host.as_str(), dest.port)),
        )
        .await
        .map_err(|_| timeout_err())?
        .map_err(connect_err)?
        .next()
        .ok_or_else(|| {
            connect_err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "hostname resolved to no addresses",
            ))
        })?;

        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(connect_err)?;
        socket
            .set_send_buffer_size(shared.buffer_size as u32)
            .map_err(connect_err)?;
        socket
            .set_recv_buffer_size(shared.buffer_size as u32)
            .map_err(connect_err)?;
        socket
            .set_keepalive(shared.keep_alive)
            .map_err(connect_err)?;

        let stream = time::timeout(shared.connect_timeout, socket.connect(addr))
            .await
            .map_err(|_| timeout_err())?
            .map_err(connect_err)?;
        stream.set_nodelay(true).map_err(connect_err)?;

        Ok((
            BufStream::with_capacity(shared.buffer_size, shared.buffer_size, stream),
            addr,
        ))
    }

    /// Return a borrowed connection. Healthy connections are parked for
    /// reuse; invalidated ones are dropped, which closes the socket.
    pub fn checkin(&self, mut conn: PooledStream) {
        let shared = &self.shared;
        let Some(stream) = conn.stream.take() else {
            return;
        };
        shared.counters.in_use.fetch_sub(1, Ordering::Relaxed);

        if conn.healthy && !shared.closed.load(Ordering::Acquire) {
            let mut state = shared.state.lock().expect("pool state lock poisoned");
            let parked = state.idle.entry(conn.dest.clone()).or_default();
            if parked.len() < shared.max_per_node {
                parked.push(stream);
                return;
            }
        }
        shared.counters.discarded.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(dest = %conn.dest, healthy = conn.healthy, "discarding admin connection");
    }

    /// Drop all idle connections and reject further checkouts.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        let mut state = self.shared.state.lock().expect("pool state lock poisoned");
        state.idle.clear();
    }

    pub fn stats(&self) -> PoolStats {
        let counters = &self.shared.counters;
        let idle = {
            let state = self.shared.state.lock().expect("pool state lock poisoned");
            state.idle.values().map(|parked| parked.len() as u64).sum()
        };
        PoolStats {
            in_use: counters.in_use.load(Ordering::Relaxed),
            idle,
            created: counters.created.load(Ordering::Relaxed),
            reused: counters.reused.load(Ordering::Relaxed),
            discarded: counters.discarded.load(Ordering::Relaxed),
        }
    }
}

/// A borrowed connection with its capacity permit and i/o deadline.
///
/// Framed i/o goes through the methods below; any failure marks the
/// connection unhealthy so checkin discards it.
pub struct PooledStream {
    dest: Destination,
    peer: SocketAddr,
    stream: Option<BufStream<TcpStream>>,
    healthy: bool,
    io_timeout: Duration,
    shared: Arc<PoolShared>,
    _permit: OwnedSemaphorePermit,
}

impl PooledStream {
    fn new(
        pool: &SocketPool,
        dest: Destination,
        peer: SocketAddr,
        stream: BufStream<TcpStream>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            dest,
            peer,
            stream: Some(stream),
            healthy: true,
            io_timeout: pool.shared.io_timeout,
            shared: pool.shared.clone(),
            _permit: permit,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Mark the connection unusable; checkin will discard it.
    pub fn invalidate(&mut self) {
        self.healthy = false;
    }

    /// Write one varint-framed message without flushing.
    pub(crate) async fn write_framed<M: Message>(&mut self, message: &M) -> Result<(), AdminError> {
        let addr = self.peer.to_string();
        let deadline = self.io_timeout;
        let stream = self.stream.as_mut().expect("pooled stream already checked in");
        let result = match time::timeout(deadline, framing::write_message(stream, message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(AdminError::from_frame(&addr, err)),
            Err(_) => Err(AdminError::timed_out(&addr, deadline)),
        };
        if result.is_err() {
            self.healthy = false;
        }
        result
    }

    pub(crate) async fn flush(&mut self) -> Result<(), AdminError> {
        use tokio::io::AsyncWriteExt;

        let addr = self.peer.to_string();
        let deadline = self.io_timeout;
        let stream = self.stream.as_mut().expect("pooled stream already checked in");
        let result = match time::timeout(deadline, stream.flush()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(AdminError::Transport { addr, source: err }),
            Err(_) => Err(AdminError::timed_out(&addr, deadline)),
        };
        if result.is_err() {
            self.healthy = false;
        }
        result
    }

    /// Read one varint-framed message.
    pub(crate) async fn read_framed<M: Message + Default>(&mut self) -> Result<M, AdminError> {
        let addr = self.peer.to_string();
        let deadline = self.io_timeout;
        let stream = self.stream.as_mut().expect("pooled stream already checked in");
        let result = match time::timeout(deadline, framing::read_message(stream)).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(err)) => Err(AdminError::from_frame(&addr, err)),
            Err(_) => Err(AdminError::timed_out(&addr, deadline)),
        };
        if result.is_err() {
            self.healthy = false;
        }
        result
    }

    /// Write the end-of-stream marker without flushing.
    pub(crate) async fn write_end_of_stream(&mut self) -> Result<(), AdminError> {
        let addr = self.peer.to_string();
        let deadline = self.io_timeout;
        let stream = self.stream.as_mut().expect("pooled stream already checked in");
        let result = match time::timeout(deadline, framing::write_end_of_stream(stream)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(AdminError::from_frame(&addr, err)),
            Err(_) => Err(AdminError::timed_out(&addr, deadline)),
        };
        if result.is_err() {
            self.healthy = false;
        }
        result
    }

    /// Read a download-stream length prefix.
    pub(crate) async fn read_frame_len(&mut self) -> Result<i32, AdminError> {
        let addr = self.peer.to_string();
        let deadline = self.io_timeout;
        let stream = self.stream.as_mut().expect("pooled stream already checked in");
        let result = match time::timeout(deadline, framing::read_frame_len(stream)).await {
            Ok(Ok(len)) => Ok(len),
            Ok(Err(err)) => Err(AdminError::from_frame(&addr, err)),
            Err(_) => Err(AdminError::timed_out(&addr, deadline)),
        };
        if result.is_err() {
            self.healthy = false;
        }
        result
    }

    /// Read a download-stream record body of the given length.
    pub(crate) async fn read_sized<M: Message + Default>(
        &mut self,
        len: u64,
    ) -> Result<M, AdminError> {
        let addr = self.peer.to_string();
        let deadline = self.io_timeout;
        let stream = self.stream.as_mut().expect("pooled stream already checked in");
        let result = match time::timeout(deadline, framing::read_sized_message(stream, len)).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(err)) => Err(AdminError::from_frame(&addr, err)),
            Err(_) => Err(AdminError::timed_out(&addr, deadline)),
        };
        if result.is_err() {
            self.healthy = false;
        }
        result
    }
}

impl Drop for PooledStream {
    fn drop(&mut self) {
        // Dropped without checkin: the socket closes with the stream and
        // the permit frees the capacity slot.
        if self.stream.take().is_some() {
            self.shared.counters.in_use.fetch_sub(1, Ordering::Relaxed);
            self.shared.counters.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }
}
