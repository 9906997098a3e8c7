//! Event data model and MessagePack wire codec for muxrpc.
//!
//! An event is the protocol's unit of communication: a header map carrying
//! the correlation id, protocol version, and (for replies) the id of the
//! request being answered, followed by a logical name and an opaque payload.
//! The codec stays byte-compatible with the reference wire format, so the
//! exact frame layout (which fields are bin vs. str, which keys may be
//! omitted) is load-bearing, not cosmetic.

pub mod error;
pub mod event;

pub use error::{DecodeError, EncodeError};
pub use event::{new_message_id, Event, Header, PROTOCOL_VERSION};

pub use rmpv::Value;
