/// Errors raised while decoding persisted or wire data.
///
/// All of these are fatal for the structure being decoded.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The input ended before the value did.
    #[error("truncated {what}: needed {needed} bytes, {available} available")]
    Truncated {
        what: &'static str,
        needed: u64,
        available: usize,
    },

    /// The envelope requires a newer decoder.
    #[error("incompatible {what}: requires decoder version {compat}, this decoder supports {supported}")]
    Incompatible {
        what: &'static str,
        compat: u8,
        supported: u8,
    },

    /// A field holds a value outside its domain.
    #[error("invalid {what}: {value}")]
    InvalidValue { what: &'static str, value: u64 },

    /// A string field is not valid UTF-8.
    #[error("invalid utf-8 in {what}")]
    InvalidUtf8 { what: &'static str },

    /// Bytes remain after a complete top-level value.
    #[error("{count} trailing bytes after decoded value")]
    TrailingBytes { count: usize },

    /// The frame does not start with the expected magic.
    #[error("bad magic: expected {expected:?}, found {found:?}")]
    BadMagic { expected: [u8; 4], found: [u8; 4] },

    /// The frame checksum does not match its payload.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
}

/// Result alias for decoding.
pub type DecodeResult<T> = Result<T, DecodeError>;
