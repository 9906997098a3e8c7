//! Router/dealer message sockets over stream transports.
//!
//! A message socket turns connected byte streams into discrete, whole
//! messages. A router binds and accepts many peers; a dealer connects to one
//! logical peer and initiates traffic. Each accepted connection gets a reader
//! thread feeding one shared inbound queue, so `recv` sees a single merged
//! stream of deliveries tagged with the originating peer. Writes go through a
//! per-connection mutex-guarded frame writer; that mutex is the write
//! serialization point for everything layered above.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::frame::{FrameReader, FrameWriter, DEFAULT_MAX_PAYLOAD};
use crate::inproc;
use crate::stream::Stream;

/// Opaque identity of one accepted connection.
pub type PeerId = u64;

/// Message-socket pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// Binds, accepts many peers, receives unsolicited traffic.
    Router,
    /// Connects to a single logical peer and initiates traffic.
    Dealer,
}

/// One inbound message plus the identity of the connection it arrived on.
///
/// The peer id is how replies find their way back on a router. It plays the
/// role of the identity envelope a router socket would otherwise carry.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub peer: PeerId,
    pub payload: Bytes,
}

/// Configuration for a message socket.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maximum message payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// How often accept loops check for shutdown. Default: 25 ms.
    pub accept_poll_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            accept_poll_interval: Duration::from_millis(25),
        }
    }
}

impl TransportConfig {
    pub fn with_max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    pub fn with_accept_poll_interval(mut self, interval: Duration) -> Self {
        self.accept_poll_interval = interval;
        self
    }
}

enum Inbound {
    Message(Delivery),
    PeerGone(PeerId),
}

struct Conn {
    writer: Arc<Mutex<FrameWriter<Stream>>>,
    /// Clone kept for shutdown: unblocks the reader thread at close.
    stream: Stream,
}

struct Shared {
    kind: SocketKind,
    config: TransportConfig,
    conns: Mutex<HashMap<PeerId, Conn>>,
    next_peer: AtomicU64,
    inbound_tx: Mutex<Option<Sender<Inbound>>>,
    closed: AtomicBool,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

enum BoundResource {
    Inproc(String),
    IpcPath(PathBuf),
}

/// An asynchronous, connection-multiplexing message socket.
pub struct MessageSocket {
    shared: Arc<Shared>,
    inbound_rx: Mutex<Receiver<Inbound>>,
    bound: Mutex<Vec<BoundResource>>,
    last_endpoint: Mutex<Option<Endpoint>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl MessageSocket {
    /// Create a message socket of the given pattern with default config.
    pub fn new(kind: SocketKind) -> Self {
        Self::with_config(kind, TransportConfig::default())
    }

    /// Create a message socket with explicit configuration.
    pub fn with_config(kind: SocketKind, config: TransportConfig) -> Self {
        let (tx, rx) = channel();
        Self {
            shared: Arc::new(Shared {
                kind,
                config,
                conns: Mutex::new(HashMap::new()),
                next_peer: AtomicU64::new(1),
                inbound_tx: Mutex::new(Some(tx)),
                closed: AtomicBool::new(false),
                threads: Mutex::new(Vec::new()),
            }),
            inbound_rx: Mutex::new(rx),
            bound: Mutex::new(Vec::new()),
            last_endpoint: Mutex::new(None),
        }
    }

    /// The socket pattern.
    pub fn kind(&self) -> SocketKind {
        self.shared.kind
    }

    /// The most recently bound or connected endpoint, with `tcp://` bind
    /// addresses resolved to their actual port.
    pub fn last_endpoint(&self) -> Option<Endpoint> {
        lock(&self.last_endpoint).clone()
    }

    /// Bind a router to an endpoint and start accepting peers.
    pub fn bind(&self, endpoint: &Endpoint) -> Result<()> {
        if self.shared.kind != SocketKind::Router {
            return Err(TransportError::WrongKind { op: "bind" });
        }
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let resolved = match endpoint {
            Endpoint::Inproc(name) => {
                let acceptor = inproc::bind(name)?;
                lock(&self.bound).push(BoundResource::Inproc(name.clone()));
                let shared = Arc::clone(&self.shared);
                let handle = std::thread::spawn(move || run_inproc_accept(shared, acceptor));
                lock(&self.shared.threads).push(handle);
                endpoint.clone()
            }
            Endpoint::Ipc(path) => {
                remove_stale_socket(path, endpoint)?;
                let listener = UnixListener::bind(path).map_err(|e| TransportError::Bind {
                    endpoint: endpoint.to_string(),
                    source: e,
                })?;
                listener.set_nonblocking(true)?;
                lock(&self.bound).push(BoundResource::IpcPath(path.clone()));
                let shared = Arc::clone(&self.shared);
                let handle = std::thread::spawn(move || {
                    run_accept_loop(shared, move || {
                        listener.accept().map(|(s, _)| Stream::from_unix(s))
                    })
                });
                lock(&self.shared.threads).push(handle);
                endpoint.clone()
            }
            Endpoint::Tcp(addr) => {
                let listener =
                    TcpListener::bind(addr.as_str()).map_err(|e| TransportError::Bind {
                        endpoint: endpoint.to_string(),
                        source: e,
                    })?;
                let local = listener.local_addr()?;
                listener.set_nonblocking(true)?;
                let shared = Arc::clone(&self.shared);
                let handle = std::thread::spawn(move || {
                    run_accept_loop(shared, move || {
                        listener.accept().map(|(s, _)| Stream::from_tcp(s))
                    })
                });
                lock(&self.shared.threads).push(handle);
                Endpoint::Tcp(local.to_string())
            }
        };

        info!(endpoint = %resolved, "listening");
        *lock(&self.last_endpoint) = Some(resolved);
        Ok(())
    }

    /// Connect a dealer to its peer.
    pub fn connect(&self, endpoint: &Endpoint) -> Result<()> {
        if self.shared.kind != SocketKind::Dealer {
            return Err(TransportError::WrongKind { op: "connect" });
        }
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if !lock(&self.shared.conns).is_empty() {
            return Err(TransportError::AlreadyConnected);
        }

        let stream = match endpoint {
            Endpoint::Ipc(path) => Stream::from_unix(UnixStream::connect(path).map_err(|e| {
                TransportError::Connect {
                    endpoint: endpoint.to_string(),
                    source: e,
                }
            })?),
            Endpoint::Tcp(addr) => Stream::from_tcp(TcpStream::connect(addr.as_str()).map_err(
                |e| TransportError::Connect {
                    endpoint: endpoint.to_string(),
                    source: e,
                },
            )?),
            Endpoint::Inproc(name) => Stream::from_unix(inproc::connect(name)?),
        };

        register_conn(&self.shared, stream)?;
        info!(%endpoint, "connected");
        *lock(&self.last_endpoint) = Some(endpoint.clone());
        Ok(())
    }

    /// Send one message.
    ///
    /// `peer` routes the message on a router; `None` targets the socket's
    /// sole connection (dealer semantics).
    pub fn send(&self, peer: Option<PeerId>, payload: &[u8]) -> Result<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let writer = {
            let conns = lock(&self.shared.conns);
            let conn = match peer {
                Some(p) => conns.get(&p).ok_or(TransportError::NoRoute { peer: p })?,
                None => conns.values().next().ok_or(TransportError::NotConnected)?,
            };
            Arc::clone(&conn.writer)
        };

        let result = lock(&writer).write_message(payload);
        result
    }

    /// Receive the next inbound message (blocking). Single consumer.
    ///
    /// On a router, a peer hanging up is recoverable and skipped over; on a
    /// dealer, losing the one peer surfaces as `Disconnected` and the socket
    /// is no longer usable for receiving.
    pub fn recv(&self) -> Result<Delivery> {
        let rx = lock(&self.inbound_rx);
        loop {
            match rx.recv() {
                Ok(Inbound::Message(delivery)) => return Ok(delivery),
                Ok(Inbound::PeerGone(peer)) => {
                    // A locally initiated close also severs every stream;
                    // don't report that as a peer failure.
                    if self.shared.closed.load(Ordering::SeqCst) {
                        return Err(TransportError::Closed);
                    }
                    match self.shared.kind {
                        SocketKind::Dealer => return Err(TransportError::Disconnected),
                        SocketKind::Router => {
                            debug!(peer, "peer disconnected");
                            continue;
                        }
                    }
                }
                Err(_) => return Err(TransportError::Closed),
            }
        }
    }

    /// Close the socket: stop accepting, tear down every connection, join
    /// the worker threads. Idempotent; safe from any thread.
    pub fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("closing message socket");

        for resource in lock(&self.bound).drain(..) {
            match resource {
                BoundResource::Inproc(name) => inproc::unbind(&name),
                BoundResource::IpcPath(path) => {
                    let _ = std::fs::remove_file(&path);
                }
            }
        }

        for conn in lock(&self.shared.conns).values() {
            conn.stream.shutdown();
        }
        // Dropping the primary sender lets `recv` observe closure once the
        // reader threads have drained away.
        *lock(&self.shared.inbound_tx) = None;

        let handles: Vec<_> = lock(&self.shared.threads).drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        lock(&self.shared.conns).clear();
        Ok(())
    }
}

impl Drop for MessageSocket {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for MessageSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSocket")
            .field("kind", &self.shared.kind)
            .field("closed", &self.shared.closed.load(Ordering::SeqCst))
            .finish()
    }
}

/// Never remove a path that is not a socket; a stale socket file from a
/// crashed process is fair game.
fn remove_stale_socket(path: &Path, endpoint: &Endpoint) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let bind_err = |source| TransportError::Bind {
        endpoint: endpoint.to_string(),
        source,
    };
    let metadata = std::fs::symlink_metadata(path).map_err(bind_err)?;
    if metadata.file_type().is_socket() {
        debug!(?path, "removing stale socket");
        std::fs::remove_file(path).map_err(bind_err)?;
        Ok(())
    } else {
        Err(bind_err(std::io::Error::new(
            ErrorKind::AlreadyExists,
            "existing path is not a unix socket",
        )))
    }
}

fn run_accept_loop(shared: Arc<Shared>, accept: impl Fn() -> std::io::Result<Stream>) {
    let poll = shared.config.accept_poll_interval;
    loop {
        if shared.closed.load(Ordering::SeqCst) {
            break;
        }
        match accept() {
            Ok(stream) => {
                if register_conn(&shared, stream).is_err() {
                    break;
                }
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => std::thread::sleep(poll),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(error = %err, "accept failed, listener stopping");
                break;
            }
        }
    }
}

fn run_inproc_accept(shared: Arc<Shared>, acceptor: Receiver<UnixStream>) {
    while let Ok(stream) = acceptor.recv() {
        if register_conn(&shared, Stream::from_unix(stream)).is_err() {
            break;
        }
    }
}

fn register_conn(shared: &Arc<Shared>, stream: Stream) -> Result<PeerId> {
    if shared.closed.load(Ordering::SeqCst) {
        stream.shutdown();
        return Err(TransportError::Closed);
    }

    let Some(tx) = lock(&shared.inbound_tx).clone() else {
        stream.shutdown();
        return Err(TransportError::Closed);
    };

    // Accepted streams inherit the listener's non-blocking flag.
    stream.set_blocking()?;

    let peer = shared.next_peer.fetch_add(1, Ordering::Relaxed);
    let read_half = stream.try_clone()?;
    let writer = Arc::new(Mutex::new(FrameWriter::new(
        stream.try_clone()?,
        shared.config.max_payload_size,
    )));
    lock(&shared.conns).insert(peer, Conn { writer, stream });

    let reader_shared = Arc::clone(shared);
    let handle = std::thread::spawn(move || run_reader(reader_shared, peer, read_half, tx));
    lock(&shared.threads).push(handle);

    if shared.closed.load(Ordering::SeqCst) {
        // Close raced the registration; tear the connection down so the
        // reader exits promptly.
        if let Some(conn) = lock(&shared.conns).remove(&peer) {
            conn.stream.shutdown();
        }
        return Err(TransportError::Closed);
    }

    debug!(peer, "connection registered");
    Ok(peer)
}

fn run_reader(shared: Arc<Shared>, peer: PeerId, stream: Stream, tx: Sender<Inbound>) {
    let mut reader = FrameReader::new(stream, shared.config.max_payload_size);
    loop {
        match reader.read_message() {
            Ok(payload) => {
                if tx.send(Inbound::Message(Delivery { peer, payload })).is_err() {
                    break;
                }
            }
            Err(TransportError::ConnectionClosed) => {
                debug!(peer, "peer closed connection");
                break;
            }
            Err(err) => {
                warn!(peer, error = %err, "read failed, dropping connection");
                break;
            }
        }
    }
    lock(&shared.conns).remove(&peer);
    let _ = tx.send(Inbound::PeerGone(peer));
}
