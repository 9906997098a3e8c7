//! Correlation-multiplexed event RPC over router/dealer message sockets.
//!
//! Any number of independent request/response exchanges share one physical
//! socket, identified purely by a correlation id carried inside each event,
//! not by transport-layer addressing. A [`Socket`] owns the transport, the
//! channel registry, and one dispatch thread that is the sole transport
//! reader; each [`Channel`] is one logical exchange with blocking send and
//! receive. [`Client`] and [`Server`] are thin conveniences on top: a
//! channel per call on one side, a handler per method name on the other.
//!
//! To serve methods:
//! 1. Create a [`Server`] (`Server::router()`)
//! 2. `register_method(name, handler)` for each method
//! 3. `bind(endpoint)` and `start()`
//!
//! To call them:
//! 1. Create a [`Client`] (`Client::dealer()`)
//! 2. `connect(endpoint)`
//! 3. `invoke(method, args)`

pub mod channel;
pub mod client;
pub mod error;
pub mod server;
pub mod socket;

pub use channel::Channel;
pub use client::Client;
pub use error::{Error, Result};
pub use server::{Server, ERROR_EVENT_NAME, NO_SUCH_METHOD};
pub use socket::{Socket, SocketConfig};

pub use muxrpc_transport::{Endpoint, SocketKind};
pub use muxrpc_wire::{new_message_id, Event, Header, Value, PROTOCOL_VERSION};
