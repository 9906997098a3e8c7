//! The channel-multiplexing engine.
//!
//! A `Socket` owns one transport socket, a registry of live channels keyed
//! by correlation id, and a single dispatch thread that is the sole reader
//! of the transport. Inbound frames are decoded, routed to the channel
//! matching their correlation id, or, for unsolicited requests, turned
//! into fresh channels handed out through [`Socket::accept`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, sync_channel, Receiver, Sender, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use muxrpc_transport::{
    Endpoint, MessageSocket, PeerId, SocketKind, TransportConfig, TransportError,
    DEFAULT_MAX_PAYLOAD,
};
use muxrpc_wire::Event;
use tracing::{debug, warn};

use crate::channel::Channel;
use crate::error::{Error, Result};

/// Configuration for a multiplexing socket.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// How many unclaimed inbound exchanges may queue up for
    /// [`Socket::accept`] before new ones are dropped. Default: 64.
    pub accept_backlog: usize,
    /// Maximum transport payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            accept_backlog: 64,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl SocketConfig {
    pub fn with_accept_backlog(mut self, backlog: usize) -> Self {
        self.accept_backlog = backlog;
        self
    }

    pub fn with_max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }
}

pub(crate) struct SocketShared {
    transport: MessageSocket,
    registry: Mutex<HashMap<String, Sender<Event>>>,
    pending_tx: Mutex<Option<SyncSender<Channel>>>,
    fail_reason: Mutex<Option<Arc<TransportError>>>,
    closed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl SocketShared {
    pub(crate) fn is_registered(&self, id: &str) -> bool {
        lock(&self.registry).contains_key(id)
    }

    /// Remove a channel from the registry. Dropping its event sender is what
    /// wakes a receiver blocked on that channel. Benign if absent.
    pub(crate) fn unregister(&self, id: &str) {
        lock(&self.registry).remove(id);
    }

    pub(crate) fn send_payload(&self, peer: Option<PeerId>, payload: &[u8]) -> Result<()> {
        match self.transport.send(peer, payload) {
            Ok(()) => Ok(()),
            Err(TransportError::Closed) => Err(self.socket_error()),
            Err(err) => Err(Error::Transport(err)),
        }
    }

    /// The error a woken channel operation observes: the socket's fatal
    /// failure if there is one, otherwise a plain closed channel.
    pub(crate) fn channel_error(&self) -> Error {
        match lock(&self.fail_reason).as_ref() {
            Some(reason) => Error::SocketFailed(Arc::clone(reason)),
            None => Error::ChannelClosed,
        }
    }

    /// The error a socket-level operation observes after shutdown.
    fn socket_error(&self) -> Error {
        match lock(&self.fail_reason).as_ref() {
            Some(reason) => Error::SocketFailed(Arc::clone(reason)),
            None => Error::SocketClosed,
        }
    }
}

/// A multiplexing socket: one transport connection shared by any number of
/// concurrent logical exchanges.
pub struct Socket {
    shared: Arc<SocketShared>,
    pending_rx: Mutex<Receiver<Channel>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl Socket {
    /// Create a socket of the given transport pattern with default config.
    pub fn new(kind: SocketKind) -> Self {
        Self::with_config(kind, SocketConfig::default())
    }

    /// Create a socket with explicit configuration. The dispatch loop starts
    /// immediately and runs until [`close`](Self::close).
    pub fn with_config(kind: SocketKind, config: SocketConfig) -> Self {
        let transport = MessageSocket::with_config(
            kind,
            TransportConfig::default().with_max_payload_size(config.max_payload_size),
        );
        let (pending_tx, pending_rx) = sync_channel(config.accept_backlog);

        let shared = Arc::new(SocketShared {
            transport,
            registry: Mutex::new(HashMap::new()),
            pending_tx: Mutex::new(Some(pending_tx)),
            fail_reason: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        let dispatch_shared = Arc::clone(&shared);
        let dispatch = std::thread::spawn(move || run_dispatch(dispatch_shared));

        Self {
            shared,
            pending_rx: Mutex::new(pending_rx),
            dispatch: Mutex::new(Some(dispatch)),
        }
    }

    /// The transport pattern this socket was created with.
    pub fn kind(&self) -> SocketKind {
        self.shared.transport.kind()
    }

    /// Bind a router socket to an endpoint.
    pub fn bind(&self, endpoint: &Endpoint) -> Result<()> {
        self.shared.transport.bind(endpoint).map_err(Error::from)
    }

    /// Connect a dealer socket to its peer.
    pub fn connect(&self, endpoint: &Endpoint) -> Result<()> {
        self.shared.transport.connect(endpoint).map_err(Error::from)
    }

    /// The most recently bound or connected endpoint, with `tcp://` binds
    /// resolved to their actual port.
    pub fn last_endpoint(&self) -> Option<Endpoint> {
        self.shared.transport.last_endpoint()
    }

    /// Open and register a channel under `correlation_id`.
    ///
    /// `response_to` marks the channel as a responder: events it sends carry
    /// `response_to` and a fresh message id. Opening a duplicate correlation
    /// id is a programmer error, not a transient condition.
    pub fn open_channel(&self, correlation_id: &str, response_to: Option<&str>) -> Result<Channel> {
        if self.shared.closed.load(Ordering::SeqCst)
            || lock(&self.shared.fail_reason).is_some()
        {
            // A failed dispatch loop can never deliver to a new channel.
            return Err(self.shared.socket_error());
        }

        let (tx, rx) = channel();
        {
            let mut registry = lock(&self.shared.registry);
            if registry.contains_key(correlation_id) {
                return Err(Error::DuplicateChannel(correlation_id.to_string()));
            }
            registry.insert(correlation_id.to_string(), tx);
        }

        Ok(Channel::new(
            correlation_id.to_string(),
            response_to.map(str::to_string),
            None,
            rx,
            Arc::clone(&self.shared),
        ))
    }

    /// Close the channel registered under `correlation_id`, waking any
    /// blocked receiver. Benign if no such channel exists.
    pub fn close_channel(&self, correlation_id: &str) -> Result<()> {
        self.shared.unregister(correlation_id);
        Ok(())
    }

    /// Block until the dispatch loop hands out the next unclaimed inbound
    /// exchange. Multiple threads may call this; each exchange goes to
    /// exactly one caller.
    pub fn accept(&self) -> Result<Channel> {
        let rx = lock(&self.pending_rx);
        rx.recv().map_err(|_| self.shared.socket_error())
    }

    /// Close the socket: stop the dispatch loop, close every registered
    /// channel, release the transport. Idempotent; safe from any thread.
    pub fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.transport.close()?;
        if let Some(handle) = lock(&self.dispatch).take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("kind", &self.kind())
            .field("closed", &self.shared.closed.load(Ordering::SeqCst))
            .finish()
    }
}

/// The sole reader of the transport. Runs until the socket closes or the
/// transport fails fatally.
fn run_dispatch(shared: Arc<SocketShared>) {
    loop {
        let delivery = match shared.transport.recv() {
            Ok(delivery) => delivery,
            Err(TransportError::Closed) => break,
            Err(err) => {
                warn!(error = %err, "transport failed, dispatch loop stopping");
                *lock(&shared.fail_reason) = Some(Arc::new(err));
                break;
            }
        };

        // Malformed peer input must never take the dispatch loop down: the
        // frame is dropped and the loop moves on.
        let event = match Event::decode(&delivery.payload) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "dropping malformed event frame");
                continue;
            }
        };

        route_event(&shared, delivery.peer, event);
    }

    // Dropping every registered sender wakes all blocked receivers; with a
    // fail reason recorded they observe the transport error, otherwise a
    // plain channel close.
    lock(&shared.registry).clear();
    *lock(&shared.pending_tx) = None;
}

fn route_event(shared: &Arc<SocketShared>, peer: PeerId, event: Event) {
    let key = event
        .header
        .response_to
        .clone()
        .unwrap_or_else(|| event.header.message_id.clone());

    {
        let registry = lock(&shared.registry);
        if let Some(tx) = registry.get(&key) {
            // Unbounded handoff: the dispatch loop never stalls on a slow
            // consumer.
            if tx.send(event).is_err() {
                debug!(correlation = %key, "receiver gone, event discarded");
            }
            return;
        }
    }

    if event.header.response_to.is_some() {
        // A reply nobody is waiting for (e.g. the requester timed out and
        // closed its channel). Not an unsolicited request, so no new
        // channel is opened for it.
        debug!(correlation = %key, "dropping reply with no awaiting channel");
        return;
    }

    // Unsolicited request: register a channel under its message id, deliver
    // the event to it, and queue the exchange for `accept`.
    let (tx, rx) = channel();
    let _ = tx.send(event);
    lock(&shared.registry).insert(key.clone(), tx);
    let exchange = Channel::new(
        key.clone(),
        Some(key.clone()),
        Some(peer),
        rx,
        Arc::clone(shared),
    );

    let pending = lock(&shared.pending_tx).clone();
    let Some(pending) = pending else {
        return;
    };
    match pending.try_send(exchange) {
        Ok(()) => {}
        Err(TrySendError::Full(exchange)) => {
            // Bounded handoff: under bursty input, excess exchanges are shed
            // here instead of growing without limit.
            warn!(correlation = %key, "pending exchange queue full, dropping request");
            drop(exchange);
        }
        Err(TrySendError::Disconnected(exchange)) => {
            drop(exchange);
        }
    }
}
