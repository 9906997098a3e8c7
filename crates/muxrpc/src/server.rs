use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

use muxrpc_transport::{Endpoint, SocketKind};
use muxrpc_wire::{Event, Value};
use tracing::debug;

use crate::channel::Channel;
use crate::error::Result;
use crate::socket::Socket;

/// Name of the protocol-level error reply event.
pub const ERROR_EVENT_NAME: &str = "ERR";

/// Error name sent when no handler is registered for a method.
pub const NO_SUCH_METHOD: &str = "NoSuchMethod";

const DEFAULT_WORKERS: usize = 4;

/// A method handler: receives the request event, returns an optional reply.
///
/// `Ok(Some(reply))` sends the reply on the same exchange; `Ok(None)` sends
/// nothing; `Err` is logged and nothing is sent. The exchange is closed
/// afterwards in every case.
pub type Handler = Box<dyn Fn(&Event) -> Result<Option<Event>> + Send + Sync>;

/// Thin RPC convenience layer over a [`Socket`]: dispatches every inbound
/// exchange to a named method handler on a fixed worker pool.
pub struct Server {
    socket: Arc<Socket>,
    handlers: Arc<RwLock<HashMap<String, Handler>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl Server {
    /// Wrap an existing socket.
    pub fn new(socket: Socket) -> Self {
        Self {
            socket: Arc::new(socket),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            workers: Mutex::new(Vec::new()),
            worker_count: DEFAULT_WORKERS,
        }
    }

    /// Create a server over a fresh router socket.
    pub fn router() -> Self {
        Self::new(Socket::new(SocketKind::Router))
    }

    /// Set the worker pool size used by [`start`](Self::start).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.worker_count = workers.max(1);
        self
    }

    /// Bind the underlying socket to an endpoint.
    pub fn bind(&self, endpoint: &Endpoint) -> Result<()> {
        self.socket.bind(endpoint)
    }

    /// The underlying socket's resolved endpoint, once bound.
    pub fn last_endpoint(&self) -> Option<Endpoint> {
        self.socket.last_endpoint()
    }

    /// Install a named method handler. May be called at any time, including
    /// while the server is running.
    pub fn register_method<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&Event) -> Result<Option<Event>> + Send + Sync + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner());
        handlers.insert(name.into(), Box::new(handler));
    }

    /// Start the worker pool. Each worker consumes inbound exchanges from
    /// the socket until it closes. Calling start on a running server is a
    /// no-op.
    pub fn start(&self) {
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        if !workers.is_empty() {
            return;
        }
        for _ in 0..self.worker_count {
            let socket = Arc::clone(&self.socket);
            let handlers = Arc::clone(&self.handlers);
            workers.push(std::thread::spawn(move || run_worker(&socket, &handlers)));
        }
    }

    /// Close the underlying socket and join the workers.
    pub fn close(&self) -> Result<()> {
        self.socket.close()?;
        let handles: Vec<_> = {
            let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            workers.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.join();
        }
        Ok(())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn run_worker(socket: &Socket, handlers: &RwLock<HashMap<String, Handler>>) {
    while let Ok(exchange) = socket.accept() {
        serve_exchange(&exchange, handlers);
        // One round trip per exchange; the channel closes when it drops.
    }
}

fn serve_exchange(exchange: &Channel, handlers: &RwLock<HashMap<String, Handler>>) {
    let request = match exchange.recv_event() {
        Ok(event) => event,
        Err(err) => {
            debug!(error = %err, "exchange ended before a request arrived");
            return;
        }
    };

    let handlers = handlers.read().unwrap_or_else(|e| e.into_inner());
    match handlers.get(&request.name) {
        Some(handler) => match handler(&request) {
            Ok(Some(reply)) => {
                if let Err(err) = exchange.send_event(reply) {
                    debug!(method = %request.name, error = %err, "failed to send reply");
                }
            }
            Ok(None) => {}
            Err(err) => {
                debug!(method = %request.name, error = %err, "handler failed, no reply sent");
            }
        },
        None => {
            debug!(method = %request.name, "no handler registered");
            let reply = Event::new(
                ERROR_EVENT_NAME,
                Value::Array(vec![
                    Value::from(NO_SUCH_METHOD),
                    Value::from(format!("no handler registered for `{}`", request.name)),
                ]),
            );
            if let Err(err) = exchange.send_event(reply) {
                debug!(method = %request.name, error = %err, "failed to send error reply");
            }
        }
    }
}
