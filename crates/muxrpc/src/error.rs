use std::sync::Arc;
use std::time::Duration;

/// Errors that can occur in channel and socket operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Event encoding failed; nothing was transmitted.
    #[error("encode error: {0}")]
    Encode(#[from] muxrpc_wire::EncodeError),

    /// Transport-level error on an in-flight operation.
    #[error("transport error: {0}")]
    Transport(#[from] muxrpc_transport::TransportError),

    /// The socket's dispatch loop died from a fatal transport error. Every
    /// caller blocked on this socket observes the same failure.
    #[error("socket failed: {0}")]
    SocketFailed(Arc<muxrpc_transport::TransportError>),

    /// The channel was closed, or the operation targeted a closed channel.
    #[error("channel closed")]
    ChannelClosed,

    /// A channel with this correlation id is already registered.
    #[error("channel `{0}` is already open")]
    DuplicateChannel(String),

    /// The socket was closed.
    #[error("socket closed")]
    SocketClosed,

    /// A bounded receive expired before an event arrived.
    #[error("receive timed out after {0:?}")]
    Timeout(Duration),

    /// The peer answered with a protocol-level error event.
    #[error("remote error `{name}`: {message}")]
    Remote { name: String, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;
