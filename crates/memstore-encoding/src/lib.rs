//! Versioned binary encoding for memstore structures.
//!
//! Every aggregate is written inside an *envelope*:
//!
//! ```text
//! [1 byte: structure version]
//! [1 byte: minimum compatible version]
//! [8 bytes: body length (little-endian u64)]
//! [N bytes: body]
//! ```
//!
//! A decoder that understands version `v` accepts any envelope whose minimum
//! compatible version is `<= v`, and skips body bytes appended by newer
//! encoders. Integers are fixed-width little-endian; byte strings, strings
//! and collections carry a `u64` length or count prefix.
//!
//! Decoding never attempts partial recovery: an incompatible envelope, a
//! truncated body or an invalid value is reported as a [`DecodeError`] and
//! the caller is expected to abandon the whole structure.

pub mod decoder;
pub mod encoder;
pub mod error;
mod impls;

pub use decoder::Decoder;
pub use encoder::Encoder;
pub use error::{DecodeError, DecodeResult};

/// A value with a binary encoding.
pub trait Encode {
    /// Append the encoding of `self` to `enc`.
    fn encode(&self, enc: &mut Encoder);
}

/// A value that can be rebuilt from its binary encoding.
pub trait Decode: Sized {
    /// Consume one value from `dec`.
    fn decode(dec: &mut Decoder<'_>) -> DecodeResult<Self>;
}

/// Encode a single value into a fresh buffer.
pub fn to_bytes<T: Encode + ?Sized>(value: &T) -> bytes::Bytes {
    let mut enc = Encoder::new();
    value.encode(&mut enc);
    enc.finish()
}

/// Decode a single value, rejecting trailing garbage.
pub fn from_bytes<T: Decode>(data: &[u8]) -> DecodeResult<T> {
    let mut dec = Decoder::new(data);
    let value = T::decode(&mut dec)?;
    dec.finish()?;
    Ok(value)
}
