use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use muxrpc_transport::PeerId;
use muxrpc_wire::{new_message_id, Event, PROTOCOL_VERSION};

use crate::error::Result;
use crate::socket::SocketShared;

/// One logical, correlation-scoped exchange over a shared socket.
///
/// A channel is opened either by a local caller (it initiates a request and
/// awaits the correlated reply) or by the socket's dispatch loop when an
/// unsolicited inbound event arrives (it answers a peer's request). The
/// channel owns the inbound queue for its correlation id; the socket's
/// dispatch loop is the only writer of that queue.
///
/// Dropping a channel closes it, so it is released on every exit path.
pub struct Channel {
    id: String,
    response_to: Option<String>,
    peer: Option<PeerId>,
    events: Receiver<Event>,
    shared: Arc<SocketShared>,
}

impl Channel {
    pub(crate) fn new(
        id: String,
        response_to: Option<String>,
        peer: Option<PeerId>,
        events: Receiver<Event>,
        shared: Arc<SocketShared>,
    ) -> Self {
        Self {
            id,
            response_to,
            peer,
            events,
            shared,
        }
    }

    /// The correlation id this channel was opened with.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Send an event on this channel.
    ///
    /// The event's header is forced to the channel's correlation semantics:
    /// an initiator stamps its own id as `message_id` with no `response_to`;
    /// a responder stamps `response_to` with the channel id and a fresh
    /// `message_id`. Encode and transport errors surface verbatim; there are
    /// no retries.
    pub fn send_event(&self, event: Event) -> Result<()> {
        if !self.shared.is_registered(&self.id) {
            return Err(self.shared.channel_error());
        }

        let mut event = event;
        event.header.version = PROTOCOL_VERSION;
        match &self.response_to {
            Some(response_to) => {
                event.header.response_to = Some(response_to.clone());
                event.header.message_id = new_message_id();
            }
            None => {
                event.header.message_id = self.id.clone();
                event.header.response_to = None;
            }
        }

        let payload = event.encode()?;
        self.shared.send_payload(self.peer, &payload)
    }

    /// Block until the dispatch loop delivers the next event addressed to
    /// this channel.
    ///
    /// Returns `ChannelClosed` if the channel is closed while waiting, or
    /// the socket's fatal error if the socket fails.
    pub fn recv_event(&self) -> Result<Event> {
        self.events.recv().map_err(|_| self.shared.channel_error())
    }

    /// Like [`recv_event`](Self::recv_event), with an explicit deadline.
    pub fn recv_event_timeout(&self, timeout: Duration) -> Result<Event> {
        self.events.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => crate::error::Error::Timeout(timeout),
            RecvTimeoutError::Disconnected => self.shared.channel_error(),
        })
    }

    /// Close this channel: unregister it and wake any blocked receiver.
    /// Calling close twice is a no-op, not an error.
    pub fn close(&self) -> Result<()> {
        self.shared.unregister(&self.id);
        Ok(())
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.shared.unregister(&self.id);
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("response_to", &self.response_to)
            .field("peer", &self.peer)
            .finish()
    }
}
