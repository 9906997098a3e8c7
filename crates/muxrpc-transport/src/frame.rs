//! Length-prefixed message framing over byte streams.
//!
//! Stream transports carry a continuous byte sequence; message sockets need
//! discrete messages. Every message is prefixed with a 4-byte little-endian
//! payload length. Partial reads and writes are handled internally; callers
//! always see complete messages.

use std::io::{ErrorKind, Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, TransportError};

/// Message header: payload length (4 bytes, little-endian).
pub const HEADER_SIZE: usize = 4;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Encode one message into the wire format.
pub fn encode_message(payload: &[u8], dst: &mut BytesMut, max_payload: usize) -> Result<()> {
    if payload.len() > max_payload || payload.len() > u32::MAX as usize {
        return Err(TransportError::PayloadTooLarge {
            size: payload.len(),
            max: max_payload.min(u32::MAX as usize),
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u32_le(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Decode one message from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete message yet.
/// On success, consumes the message bytes from the buffer.
pub fn decode_message(src: &mut BytesMut, max_payload: usize) -> Result<Option<Bytes>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let payload_len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
    if payload_len > max_payload {
        return Err(TransportError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    Ok(Some(src.split_to(payload_len).freeze()))
}

/// Reads complete messages from any `Read` stream.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    max_payload: usize,
}

impl<T: Read> FrameReader<T> {
    pub fn new(inner: T, max_payload: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_payload,
        }
    }

    /// Read the next complete message (blocking).
    ///
    /// Returns `Err(TransportError::ConnectionClosed)` at EOF.
    pub fn read_message(&mut self) -> Result<Bytes> {
        loop {
            if let Some(payload) = decode_message(&mut self.buf, self.max_payload)? {
                return Ok(payload);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            };

            if read == 0 {
                return Err(TransportError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }
}

/// Writes complete messages to any `Write` stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    max_payload: usize,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T, max_payload: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_payload,
        }
    }

    /// Frame and write one message, then flush (blocking).
    pub fn write_message(&mut self, payload: &[u8]) -> Result<()> {
        self.buf.clear();
        encode_message(payload, &mut self.buf, self.max_payload)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(TransportError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }

        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let mut buf = BytesMut::new();
        encode_message(b"hello, muxrpc!", &mut buf, DEFAULT_MAX_PAYLOAD).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + 14);

        let payload = decode_message(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        assert_eq!(payload.as_ref(), b"hello, muxrpc!");
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_incomplete_header() {
        let mut buf = BytesMut::from(&[0x05, 0x00][..]);
        assert!(decode_message(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
    }

    #[test]
    fn decode_incomplete_payload() {
        let mut buf = BytesMut::new();
        encode_message(b"hello", &mut buf, DEFAULT_MAX_PAYLOAD).unwrap();
        buf.truncate(HEADER_SIZE + 2);
        assert!(decode_message(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
    }

    #[test]
    fn decode_rejects_oversized_length() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(64 * 1024 * 1024);
        let err = decode_message(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap_err();
        assert!(matches!(err, TransportError::PayloadTooLarge { .. }));
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let mut buf = BytesMut::new();
        let err = encode_message(&[0u8; 32], &mut buf, 16).unwrap_err();
        assert!(matches!(err, TransportError::PayloadTooLarge { .. }));
    }

    #[test]
    fn empty_payload_roundtrip() {
        let mut buf = BytesMut::new();
        encode_message(b"", &mut buf, DEFAULT_MAX_PAYLOAD).unwrap();
        let payload = decode_message(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn reader_handles_multiple_messages() {
        let mut wire = BytesMut::new();
        encode_message(b"one", &mut wire, DEFAULT_MAX_PAYLOAD).unwrap();
        encode_message(b"two", &mut wire, DEFAULT_MAX_PAYLOAD).unwrap();

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()), DEFAULT_MAX_PAYLOAD);
        assert_eq!(reader.read_message().unwrap().as_ref(), b"one");
        assert_eq!(reader.read_message().unwrap().as_ref(), b"two");
        assert!(matches!(
            reader.read_message().unwrap_err(),
            TransportError::ConnectionClosed
        ));
    }

    #[test]
    fn reader_handles_byte_by_byte_input() {
        struct Trickle {
            bytes: Vec<u8>,
            pos: usize,
        }
        impl Read for Trickle {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if self.pos >= self.bytes.len() || buf.is_empty() {
                    return Ok(0);
                }
                buf[0] = self.bytes[self.pos];
                self.pos += 1;
                Ok(1)
            }
        }

        let mut wire = BytesMut::new();
        encode_message(b"slow", &mut wire, DEFAULT_MAX_PAYLOAD).unwrap();
        let mut reader = FrameReader::new(
            Trickle {
                bytes: wire.to_vec(),
                pos: 0,
            },
            DEFAULT_MAX_PAYLOAD,
        );
        assert_eq!(reader.read_message().unwrap().as_ref(), b"slow");
    }

    #[test]
    fn eof_mid_message_is_connection_closed() {
        let mut wire = BytesMut::new();
        wire.put_u32_le(16);
        wire.put_slice(b"only-part");

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()), DEFAULT_MAX_PAYLOAD);
        assert!(matches!(
            reader.read_message().unwrap_err(),
            TransportError::ConnectionClosed
        ));
    }

    #[test]
    fn writer_output_decodes() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()), DEFAULT_MAX_PAYLOAD);
        writer.write_message(b"ping").unwrap();
        writer.write_message(b"pong").unwrap();

        let wire = writer.inner.into_inner();
        let mut reader = FrameReader::new(Cursor::new(wire), DEFAULT_MAX_PAYLOAD);
        assert_eq!(reader.read_message().unwrap().as_ref(), b"ping");
        assert_eq!(reader.read_message().unwrap().as_ref(), b"pong");
    }

    #[test]
    fn roundtrip_over_socket_pair() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = FrameWriter::new(left, DEFAULT_MAX_PAYLOAD);
        let mut reader = FrameReader::new(right, DEFAULT_MAX_PAYLOAD);

        writer.write_message(b"across the pair").unwrap();
        assert_eq!(reader.read_message().unwrap().as_ref(), b"across the pair");
    }
}
