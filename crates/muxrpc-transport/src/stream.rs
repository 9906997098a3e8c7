use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::unix::net::UnixStream;

use crate::error::Result;

/// A connected byte stream that implements Read + Write.
///
/// `ipc://` and `inproc://` endpoints wrap Unix domain socket streams,
/// `tcp://` endpoints wrap TCP streams.
pub(crate) struct Stream {
    inner: StreamInner,
}

enum StreamInner {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Stream {
    pub(crate) fn from_unix(stream: UnixStream) -> Self {
        Self {
            inner: StreamInner::Unix(stream),
        }
    }

    pub(crate) fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: StreamInner::Tcp(stream),
        }
    }

    /// Clone this stream (new file descriptor over the same connection).
    ///
    /// Used to split a connection into a read half for the reader thread and
    /// a write half guarded by the send mutex.
    pub(crate) fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            StreamInner::Unix(s) => Ok(Self::from_unix(s.try_clone()?)),
            StreamInner::Tcp(s) => Ok(Self::from_tcp(s.try_clone()?)),
        }
    }

    /// Force blocking mode. Streams accepted from a non-blocking listener
    /// may inherit its non-blocking flag on some platforms.
    pub(crate) fn set_blocking(&self) -> std::io::Result<()> {
        match &self.inner {
            StreamInner::Unix(s) => s.set_nonblocking(false),
            StreamInner::Tcp(s) => s.set_nonblocking(false),
        }
    }

    /// Shut down both directions, unblocking any thread parked in `read`.
    pub(crate) fn shutdown(&self) {
        let _ = match &self.inner {
            StreamInner::Unix(s) => s.shutdown(Shutdown::Both),
            StreamInner::Tcp(s) => s.shutdown(Shutdown::Both),
        };
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            StreamInner::Unix(s) => s.read(buf),
            StreamInner::Tcp(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            StreamInner::Unix(s) => s.write(buf),
            StreamInner::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            StreamInner::Unix(s) => s.flush(),
            StreamInner::Tcp(s) => s.flush(),
        }
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.inner {
            StreamInner::Unix(_) => "unix",
            StreamInner::Tcp(_) => "tcp",
        };
        f.debug_struct("Stream").field("type", &kind).finish()
    }
}
