//! In-process rendezvous for `inproc://` endpoints.
//!
//! A process-global name registry pairs binders and connectors. The binder
//! parks on a receiver of freshly created socket pairs; each connector
//! creates a `UnixStream::pair`, pushes one end to the binder, and keeps the
//! other. Names are released when the binder closes.

use std::collections::HashMap;
use std::os::unix::net::UnixStream;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Mutex, OnceLock};

use crate::error::{Result, TransportError};

static REGISTRY: OnceLock<Mutex<HashMap<String, Sender<UnixStream>>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<String, Sender<UnixStream>>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Claim `name` and return the acceptor side: a stream of incoming
/// connections. Fails if the name is already bound.
pub(crate) fn bind(name: &str) -> Result<Receiver<UnixStream>> {
    let mut names = registry().lock().unwrap_or_else(|e| e.into_inner());
    if names.contains_key(name) {
        return Err(TransportError::Bind {
            endpoint: format!("inproc://{name}"),
            source: std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                "inproc name already bound",
            ),
        });
    }
    let (tx, rx) = channel();
    names.insert(name.to_string(), tx);
    Ok(rx)
}

/// Connect to a bound name. Returns the connector's end of a fresh pair.
pub(crate) fn connect(name: &str) -> Result<UnixStream> {
    let acceptor = {
        let names = registry().lock().unwrap_or_else(|e| e.into_inner());
        names.get(name).cloned()
    };
    let not_bound = || TransportError::Connect {
        endpoint: format!("inproc://{name}"),
        source: std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "no inproc listener with this name",
        ),
    };
    let acceptor = acceptor.ok_or_else(not_bound)?;

    let (ours, theirs) = UnixStream::pair()?;
    // The binder may have closed between lookup and handoff.
    acceptor.send(theirs).map_err(|_| not_bound())?;
    Ok(ours)
}

/// Release a bound name. The binder's receiver disconnects, ending its
/// accept loop. Benign if the name is absent.
pub(crate) fn unbind(name: &str) {
    let mut names = registry().lock().unwrap_or_else(|e| e.into_inner());
    names.remove(name);
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    #[test]
    fn bind_connect_exchanges_streams() {
        let rx = bind("inproc-test-pair").unwrap();

        let mut client = connect("inproc-test-pair").unwrap();
        let mut server = rx.recv().unwrap();

        client.write_all(b"hi").unwrap();
        let mut buf = [0u8; 2];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hi");

        unbind("inproc-test-pair");
    }

    #[test]
    fn connect_unknown_name_fails() {
        assert!(matches!(
            connect("inproc-test-nobody-home"),
            Err(TransportError::Connect { .. })
        ));
    }

    #[test]
    fn duplicate_bind_fails() {
        let _rx = bind("inproc-test-dup").unwrap();
        assert!(matches!(
            bind("inproc-test-dup"),
            Err(TransportError::Bind { .. })
        ));
        unbind("inproc-test-dup");
    }

    #[test]
    fn unbind_disconnects_acceptor() {
        let rx = bind("inproc-test-unbind").unwrap();
        unbind("inproc-test-unbind");
        assert!(rx.recv().is_err());
        assert!(connect("inproc-test-unbind").is_err());
    }
}
