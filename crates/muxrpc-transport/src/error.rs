use crate::socket::PeerId;

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The endpoint string could not be parsed.
    #[error("invalid endpoint `{endpoint}`: {reason}")]
    InvalidEndpoint { endpoint: String, reason: &'static str },

    /// Binding a listener failed.
    #[error("bind to `{endpoint}` failed: {source}")]
    Bind {
        endpoint: String,
        source: std::io::Error,
    },

    /// Connecting to a remote endpoint failed.
    #[error("connect to `{endpoint}` failed: {source}")]
    Connect {
        endpoint: String,
        source: std::io::Error,
    },

    /// Accepting an inbound connection failed.
    #[error("accept failed: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred while reading or writing a message.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A stream ended before a complete message was received.
    #[error("connection closed (incomplete message)")]
    ConnectionClosed,

    /// A dealer socket lost its single peer. Fatal to the socket.
    #[error("peer disconnected")]
    Disconnected,

    /// The socket was closed locally.
    #[error("socket closed")]
    Closed,

    /// Send on a dealer that has not connected yet.
    #[error("socket is not connected")]
    NotConnected,

    /// A dealer socket may hold only one connection.
    #[error("dealer socket is already connected")]
    AlreadyConnected,

    /// The operation is not available for this socket kind.
    #[error("operation `{op}` is not supported by this socket kind")]
    WrongKind { op: &'static str },

    /// Send addressed to a peer that is no longer connected.
    #[error("no route to peer {peer}")]
    NoRoute { peer: PeerId },
}

pub type Result<T> = std::result::Result<T, TransportError>;
