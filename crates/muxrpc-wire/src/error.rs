/// Errors produced when decoding an event frame.
///
/// Decoding is all-or-nothing: any of these means the frame was dropped
/// without constructing a partial event.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The bytes are not well-formed MessagePack (truncated or garbage).
    #[error("malformed msgpack: {0}")]
    Read(#[from] rmpv::decode::Error),

    /// Well-formed MessagePack followed by unconsumed bytes.
    #[error("trailing bytes after event frame")]
    TrailingBytes,

    /// The top-level value is not a 3-element array.
    #[error("event frame is not a 3-element array")]
    BadShape,

    /// The first frame element is not a map.
    #[error("event header is not a map")]
    HeaderNotMap,

    /// A required header field is absent.
    #[error("header field `{field}` is missing")]
    MissingField { field: &'static str },

    /// A field is present but carries the wrong type.
    #[error("field `{field}` must be {expected}")]
    FieldType {
        field: &'static str,
        expected: &'static str,
    },

    /// A string-typed field holds bytes that are not valid UTF-8.
    #[error("field `{field}` is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },
}

/// Errors produced when encoding an event frame.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// Writing the msgpack representation failed (exhausted output).
    #[error("msgpack write failed: {0}")]
    Write(#[from] rmpv::encode::Error),
}
