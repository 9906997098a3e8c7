use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::TransportError;

/// A parsed transport address.
///
/// Endpoint strings use the `scheme://rest` form:
/// `tcp://host:port`, `ipc:///path/to.sock`, `inproc://name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP socket address (resolved at bind/connect time).
    Tcp(String),
    /// Filesystem-path Unix domain socket.
    Ipc(PathBuf),
    /// In-process rendezvous by name.
    Inproc(String),
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| TransportError::InvalidEndpoint {
            endpoint: s.to_string(),
            reason,
        };

        let (scheme, rest) = s.split_once("://").ok_or(invalid("missing `scheme://`"))?;
        if rest.is_empty() {
            return Err(invalid("empty address"));
        }

        match scheme {
            "tcp" => Ok(Endpoint::Tcp(rest.to_string())),
            "ipc" => Ok(Endpoint::Ipc(PathBuf::from(rest))),
            "inproc" => Ok(Endpoint::Inproc(rest.to_string())),
            _ => Err(invalid("unknown scheme")),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
            Endpoint::Ipc(path) => write!(f, "ipc://{}", path.display()),
            Endpoint::Inproc(name) => write!(f, "inproc://{name}"),
        }
    }
}
