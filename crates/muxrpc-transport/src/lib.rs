//! Router/dealer message-socket transport for muxrpc.
//!
//! Provides the asynchronous, connection-multiplexing socket abstraction the
//! RPC layer sits on: endpoint parsing (`tcp://`, `ipc://`, `inproc://`),
//! length-prefixed message framing over byte streams, and the two socket
//! patterns: a router that binds and accepts many peers, and a dealer that
//! connects to one logical peer. Connection establishment, acceptance, and
//! teardown all live here; the layers above see only whole messages tagged
//! with an opaque peer identity.

pub mod endpoint;
pub mod error;
pub mod frame;
mod inproc;
pub mod socket;
mod stream;

pub use endpoint::Endpoint;
pub use error::{Result, TransportError};
pub use frame::{FrameReader, FrameWriter, DEFAULT_MAX_PAYLOAD};
pub use socket::{Delivery, MessageSocket, PeerId, SocketKind, TransportConfig};
