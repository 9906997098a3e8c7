use std::time::Duration;

use muxrpc_transport::{Endpoint, SocketKind};
use muxrpc_wire::{Event, Value};

use crate::error::{Error, Result};
use crate::server::ERROR_EVENT_NAME;
use crate::socket::Socket;

/// Thin RPC convenience layer over a [`Socket`]: one ephemeral channel per
/// call, one correlated reply per channel.
pub struct Client {
    socket: Socket,
    request_timeout: Option<Duration>,
}

impl Client {
    /// Wrap an existing socket.
    pub fn new(socket: Socket) -> Self {
        Self {
            socket,
            request_timeout: None,
        }
    }

    /// Create a client over a fresh dealer socket.
    pub fn dealer() -> Self {
        Self::new(Socket::new(SocketKind::Dealer))
    }

    /// Bound every invoke: give up with [`Error::Timeout`] if the reply does
    /// not arrive in time. The default is to wait indefinitely.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Connect the underlying socket to a peer.
    pub fn connect(&self, endpoint: &Endpoint) -> Result<()> {
        self.socket.connect(endpoint)
    }

    /// Call a remote method and block for its result.
    ///
    /// Opens a channel under a fresh correlation id, sends the request,
    /// awaits the correlated reply, and returns its payload. The channel is
    /// released on every exit path (success, error, or panic) because the
    /// channel closes on drop.
    pub fn invoke(&self, method: &str, args: Value) -> Result<Value> {
        let request = Event::new(method, args);
        let correlation_id = request.header.message_id.clone();

        let channel = self.socket.open_channel(&correlation_id, None)?;
        channel.send_event(request)?;

        let reply = match self.request_timeout {
            Some(timeout) => channel.recv_event_timeout(timeout)?,
            None => channel.recv_event()?,
        };

        if reply.name == ERROR_EVENT_NAME {
            return Err(remote_error(&reply));
        }
        Ok(reply.args)
    }

    /// Close the underlying socket.
    pub fn close(&self) -> Result<()> {
        self.socket.close()
    }
}

/// Turn an `ERR` reply (`args = [name, message]`) into a typed error.
fn remote_error(reply: &Event) -> Error {
    match &reply.args {
        Value::Array(items) => {
            let name = items
                .first()
                .and_then(Value::as_str)
                .unwrap_or("RemoteError")
                .to_string();
            let message = items
                .get(1)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Error::Remote { name, message }
        }
        other => Error::Remote {
            name: "RemoteError".to_string(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_parses_name_and_message() {
        let mut reply = Event::new(
            ERROR_EVENT_NAME,
            Value::Array(vec![
                Value::from("NoSuchMethod"),
                Value::from("no handler registered for `Frobnicate`"),
            ]),
        );
        reply.header.response_to = Some("abc".to_string());

        let err = remote_error(&reply);
        match err {
            Error::Remote { name, message } => {
                assert_eq!(name, "NoSuchMethod");
                assert!(message.contains("Frobnicate"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn remote_error_tolerates_unstructured_args() {
        let reply = Event::new(ERROR_EVENT_NAME, Value::from("boom"));
        assert!(matches!(remote_error(&reply), Error::Remote { .. }));
    }
}
