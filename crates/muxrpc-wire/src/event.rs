use rmpv::Value;

use crate::error::{DecodeError, EncodeError};

/// Protocol version stamped into every outbound event header.
pub const PROTOCOL_VERSION: u64 = 3;

/// Event header: correlation identity and protocol version.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    /// Protocol version (`v` on the wire). Required.
    pub version: u64,
    /// Correlation key for this event. Required, opaque.
    pub message_id: String,
    /// Correlation key of the event this one replies to.
    ///
    /// `None` means "this is a new request". On the wire, absence is
    /// signalled by omitting the key entirely, never by an empty string.
    pub response_to: Option<String>,
}

/// The unit of communication: header, logical name, opaque payload.
///
/// Wire layout is a 3-element MessagePack array:
///
/// ```text
/// [ {"message_id": <bin>, "v": <uint>, ["response_to": <str>]},
///   <name: str>,
///   <args: any> ]
/// ```
///
/// `args` is whatever shape the caller gave it: a bare scalar stays a bare
/// scalar, a sequence stays a sequence. The codec never normalizes one into
/// the other.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub header: Header,
    pub name: String,
    pub args: Value,
}

impl Event {
    /// Build a new request event with a fresh message id.
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            header: Header {
                version: PROTOCOL_VERSION,
                message_id: new_message_id(),
                response_to: None,
            },
            name: name.into(),
            args,
        }
    }

    /// Encode this event into its MessagePack frame.
    ///
    /// `message_id` is emitted as msgpack bin (matching the reference wire
    /// format); `response_to` is omitted when absent or empty.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut header = Vec::with_capacity(3);
        header.push((
            Value::from("message_id"),
            Value::Binary(self.header.message_id.clone().into_bytes()),
        ));
        header.push((Value::from("v"), Value::from(self.header.version)));
        if let Some(response_to) = &self.header.response_to {
            if !response_to.is_empty() {
                header.push((Value::from("response_to"), Value::from(response_to.as_str())));
            }
        }

        let frame = Value::Array(vec![
            Value::Map(header),
            Value::from(self.name.as_str()),
            self.args.clone(),
        ]);

        let mut buf = Vec::with_capacity(64);
        rmpv::encode::write_value(&mut buf, &frame)?;
        Ok(buf)
    }

    /// Decode an event from its MessagePack frame.
    ///
    /// All-or-nothing: a structural error never leaves a half-populated
    /// event behind, and arbitrary peer input never panics.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut rd = bytes;
        let frame = rmpv::decode::read_value(&mut rd)?;
        if !rd.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }

        let Value::Array(items) = frame else {
            return Err(DecodeError::BadShape);
        };
        let [header, name, args]: [Value; 3] =
            items.try_into().map_err(|_| DecodeError::BadShape)?;

        let Value::Map(entries) = header else {
            return Err(DecodeError::HeaderNotMap);
        };

        let mut message_id = None;
        let mut version = None;
        let mut response_to = None;
        for (key, value) in entries {
            match key.as_str() {
                Some("message_id") => {
                    message_id = Some(decode_text(value, "message_id", true)?);
                }
                Some("v") => version = Some(decode_version(value)?),
                Some("response_to") => {
                    let text = decode_text(value, "response_to", false)?;
                    // An empty reply correlation means "no correlation".
                    if !text.is_empty() {
                        response_to = Some(text);
                    }
                }
                // Unknown header keys from newer peers are tolerated.
                _ => {}
            }
        }

        let message_id = message_id.ok_or(DecodeError::MissingField {
            field: "message_id",
        })?;
        let version = version.ok_or(DecodeError::MissingField { field: "v" })?;
        let name = decode_text(name, "name", false)?;

        Ok(Self {
            header: Header {
                version,
                message_id,
                response_to,
            },
            name,
            args,
        })
    }
}

/// Generate a fresh correlation id: 32 lowercase hex characters.
pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn decode_version(value: Value) -> Result<u64, DecodeError> {
    match value {
        Value::Integer(n) => n.as_u64().ok_or(DecodeError::FieldType {
            field: "v",
            expected: "a non-negative integer",
        }),
        _ => Err(DecodeError::FieldType {
            field: "v",
            expected: "a non-negative integer",
        }),
    }
}

/// Extract a UTF-8 string field. The reference format writes `message_id`
/// as msgpack bin, so that field alone also accepts binary.
fn decode_text(value: Value, field: &'static str, allow_bin: bool) -> Result<String, DecodeError> {
    match value {
        Value::String(s) => s.into_str().ok_or(DecodeError::InvalidUtf8 { field }),
        Value::Binary(b) if allow_bin => {
            String::from_utf8(b).map_err(|_| DecodeError::InvalidUtf8 { field })
        }
        _ => Err(DecodeError::FieldType {
            field,
            expected: "a string",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(message_id: &str, response_to: Option<&str>, args: Value) -> Event {
        Event {
            header: Header {
                version: 3,
                message_id: message_id.to_string(),
                response_to: response_to.map(str::to_string),
            },
            name: "event_name_goes_here".to_string(),
            args,
        }
    }

    #[test]
    fn roundtrip_scalar_args() {
        let ev = sample_event("5a741c23675b4ae18c7441da24d1f9cf", None, Value::from(5));
        let bin = ev.encode().unwrap();
        let decoded = Event::decode(&bin).unwrap();
        assert_eq!(ev, decoded);
    }

    #[test]
    fn roundtrip_sequence_args_with_response_to() {
        let ev = sample_event(
            "5a741c25675b4ae18c7441da24d1f9cf",
            Some("abc"),
            Value::Array(vec![Value::from(1), Value::from(2), Value::from(3)]),
        );
        let bin = ev.encode().unwrap();
        let decoded = Event::decode(&bin).unwrap();
        assert_eq!(ev, decoded);
    }

    #[test]
    fn roundtrip_preserves_args_shape() {
        // A one-element sequence must stay a sequence, and a bare scalar a
        // scalar; the two are distinct on the wire.
        let seq = sample_event("a".repeat(32).as_str(), None, Value::Array(vec![Value::from(7)]));
        let scalar = sample_event("a".repeat(32).as_str(), None, Value::from(7));

        let seq2 = Event::decode(&seq.encode().unwrap()).unwrap();
        let scalar2 = Event::decode(&scalar.encode().unwrap()).unwrap();

        assert_eq!(seq, seq2);
        assert_eq!(scalar, scalar2);
        assert_ne!(seq2.args, scalar2.args);
    }

    #[test]
    fn roundtrip_assorted_args() {
        let cases = vec![
            Value::Nil,
            Value::from(true),
            Value::from("alice"),
            Value::from(-42),
            Value::F64(1.5),
            Value::Binary(vec![0x00, 0xFF, 0x7E]),
            Value::Array(vec![
                Value::from("nested"),
                Value::Array(vec![Value::from(1), Value::Nil]),
            ]),
            Value::Map(vec![(Value::from("k"), Value::from("v"))]),
        ];
        for args in cases {
            let ev = sample_event("0123456789abcdef0123456789abcdef", None, args);
            let decoded = Event::decode(&ev.encode().unwrap()).unwrap();
            assert_eq!(ev, decoded);
        }
    }

    // Encodings generated by the reference implementation; both directions
    // must match byte for byte.
    const VECTOR_REQUEST: &[u8] =
        b"\x93\x82\xaamessage_id\xc4\x205a741c23675b4ae18c7441da24d1f9cf\xa1v\x03\xb4event_name_goes_here\x05";
    const VECTOR_REPLY: &[u8] =
        b"\x93\x83\xaamessage_id\xc4\x205a741c25675b4ae18c7441da24d1f9cf\xa1v\x03\xabresponse_to\xa3abc\xb4event_name_goes_here\x93\x01\x02\x03";

    #[test]
    fn decode_reference_request_vector() {
        let ev = Event::decode(VECTOR_REQUEST).unwrap();
        assert_eq!(ev.header.version, 3);
        assert_eq!(ev.header.message_id, "5a741c23675b4ae18c7441da24d1f9cf");
        assert_eq!(ev.header.response_to, None);
        assert_eq!(ev.name, "event_name_goes_here");
        assert_eq!(ev.args, Value::from(5));
    }

    #[test]
    fn decode_reference_reply_vector() {
        let ev = Event::decode(VECTOR_REPLY).unwrap();
        assert_eq!(ev.header.version, 3);
        assert_eq!(ev.header.message_id, "5a741c25675b4ae18c7441da24d1f9cf");
        assert_eq!(ev.header.response_to.as_deref(), Some("abc"));
        assert_eq!(ev.name, "event_name_goes_here");
        assert_eq!(
            ev.args,
            Value::Array(vec![Value::from(1), Value::from(2), Value::from(3)])
        );
    }

    #[test]
    fn encode_matches_reference_vectors() {
        let request = sample_event("5a741c23675b4ae18c7441da24d1f9cf", None, Value::from(5));
        assert_eq!(request.encode().unwrap(), VECTOR_REQUEST);

        let reply = sample_event(
            "5a741c25675b4ae18c7441da24d1f9cf",
            Some("abc"),
            Value::Array(vec![Value::from(1), Value::from(2), Value::from(3)]),
        );
        assert_eq!(reply.encode().unwrap(), VECTOR_REPLY);
    }

    #[test]
    fn empty_response_to_is_omitted() {
        let ev = sample_event("5a741c23675b4ae18c7441da24d1f9cf", Some(""), Value::Nil);
        let bin = ev.encode().unwrap();
        assert!(!bin
            .windows(b"response_to".len())
            .any(|w| w == b"response_to"));

        let decoded = Event::decode(&bin).unwrap();
        assert_eq!(decoded.header.response_to, None);
    }

    #[test]
    fn string_typed_message_id_accepted() {
        // Some peers write message_id as str rather than bin.
        let bin = b"\x93\x82\xaamessage_id\xa3abc\xa1v\x03\xa6abcdef\xc0";
        let ev = Event::decode(bin).unwrap();
        assert_eq!(ev.header.message_id, "abc");
        assert_eq!(ev.name, "abcdef");
        assert_eq!(ev.args, Value::Nil);
    }

    fn assert_decode_fails(encoded: &[u8]) {
        assert!(
            Event::decode(encoded).is_err(),
            "decoded an invalid event from {encoded:?}"
        );
    }

    #[test]
    fn decode_rejects_malformed_input() {
        // Invalid msgpack.
        assert_decode_fails(b"\x93abcdef");
        // Valid but irrelevant msgpack (top level is a map).
        assert_decode_fails(b"\x83\x01\x80\x02\xa6abcdef\x03\xc0");
        // Non-string name.
        assert_decode_fails(b"\x93\x82\xaamessage_id\xa3abc\xa1v\x03\xcc\xea\xc0");
        // Version is a string.
        assert_decode_fails(b"\x93\x82\xaamessage_id\xa3abc\xa1v\xa3abc\xa6abcdef\xc0");
        // No version.
        assert_decode_fails(b"\x93\x81\xaamessage_id\xa3abc\xa6abcdef\xc0");
        // No message id.
        assert_decode_fails(b"\x93\x80\xa6abcdef\xc0");
    }

    #[test]
    fn decode_rejects_truncated_and_garbage_input() {
        assert_decode_fails(b"");
        assert_decode_fails(&VECTOR_REQUEST[..VECTOR_REQUEST.len() - 4]);
        assert_decode_fails(&VECTOR_REQUEST[..1]);
        assert_decode_fails(&[0xFF, 0xFE, 0xFD]);
        // Two-element array.
        assert_decode_fails(b"\x92\x80\xa6abcdef");
        // Four-element array.
        assert_decode_fails(b"\x94\x82\xaamessage_id\xa3abc\xa1v\x03\xa6abcdef\xc0\xc0");
    }

    #[test]
    fn decode_rejects_negative_version() {
        let frame = Value::Array(vec![
            Value::Map(vec![
                (Value::from("message_id"), Value::from("abc")),
                (Value::from("v"), Value::from(-1)),
            ]),
            Value::from("abcdef"),
            Value::Nil,
        ]);
        let mut bin = Vec::new();
        rmpv::encode::write_value(&mut bin, &frame).unwrap();

        let err = Event::decode(&bin).unwrap_err();
        assert!(matches!(err, DecodeError::FieldType { field: "v", .. }));
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let mut bin = VECTOR_REQUEST.to_vec();
        bin.push(0x00);
        let err = Event::decode(&bin).unwrap_err();
        assert!(matches!(err, DecodeError::TrailingBytes));
    }

    #[test]
    fn decode_ignores_unknown_header_keys() {
        let frame = Value::Array(vec![
            Value::Map(vec![
                (Value::from("message_id"), Value::from("abc")),
                (Value::from("v"), Value::from(3)),
                (Value::from("zmqid"), Value::Binary(vec![1, 2, 3])),
            ]),
            Value::from("abcdef"),
            Value::Nil,
        ]);
        let mut bin = Vec::new();
        rmpv::encode::write_value(&mut bin, &frame).unwrap();

        let ev = Event::decode(&bin).unwrap();
        assert_eq!(ev.header.message_id, "abc");
        assert_eq!(ev.header.version, 3);
    }

    #[test]
    fn fresh_message_ids_are_32_hex_and_unique() {
        let a = new_message_id();
        let b = new_message_id();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
