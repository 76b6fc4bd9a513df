use bytes::{BufMut, Bytes, BytesMut};

use crate::Encode;

/// Size of an envelope header: version, compat, body length.
pub const ENVELOPE_HEADER_SIZE: usize = 1 + 1 + 8;

/// Append-only binary encoder.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    /// Create an empty encoder.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Create an encoder with pre-reserved capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn put_i8(&mut self, v: i8) {
        self.buf.put_i8(v);
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.put_u8(u8::from(v));
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.put_i64_le(v);
    }

    /// Length or element count prefix.
    pub fn put_len(&mut self, len: usize) {
        self.buf.put_u64_le(len as u64);
    }

    /// Length-prefixed byte string.
    pub fn put_bytes(&mut self, data: &[u8]) {
        self.put_len(data.len());
        self.buf.put_slice(data);
    }

    /// Length-prefixed UTF-8 string.
    pub fn put_str(&mut self, s: &str) {
        self.put_bytes(s.as_bytes());
    }

    /// Encode any [`Encode`] value.
    pub fn put<T: Encode + ?Sized>(&mut self, value: &T) {
        value.encode(self);
    }

    /// Write `body` inside a versioned envelope.
    ///
    /// `compat` is the oldest decoder version able to read what `body`
    /// writes. The body length is patched in once `body` returns.
    pub fn envelope(&mut self, version: u8, compat: u8, body: impl FnOnce(&mut Self)) {
        debug_assert!(compat <= version, "compat version newer than version");
        self.buf.put_u8(version);
        self.buf.put_u8(compat);
        let len_at = self.buf.len();
        self.buf.put_u64_le(0);
        let start = self.buf.len();
        body(self);
        let body_len = (self.buf.len() - start) as u64;
        self.buf[len_at..len_at + 8].copy_from_slice(&body_len.to_le_bytes());
    }

    /// Consume the encoder, returning the encoded bytes.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_are_little_endian() {
        let mut enc = Encoder::new();
        enc.put_u32(0x0102_0304);
        enc.put_u64(1);
        let out = enc.finish();
        assert_eq!(&out[..4], &[4, 3, 2, 1]);
        assert_eq!(&out[4..12], &[1, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn bytes_are_length_prefixed() {
        let mut enc = Encoder::new();
        enc.put_bytes(b"abc");
        let out = enc.finish();
        assert_eq!(out.len(), 8 + 3);
        assert_eq!(&out[..8], &3u64.to_le_bytes());
        assert_eq!(&out[8..], b"abc");
    }

    #[test]
    fn envelope_patches_length() {
        let mut enc = Encoder::new();
        enc.envelope(2, 1, |e| {
            e.put_u32(7);
            e.put_u8(9);
        });
        let out = enc.finish();
        assert_eq!(out[0], 2);
        assert_eq!(out[1], 1);
        assert_eq!(&out[2..10], &5u64.to_le_bytes());
        assert_eq!(out.len(), ENVELOPE_HEADER_SIZE + 5);
    }

    #[test]
    fn nested_envelopes() {
        let mut enc = Encoder::new();
        enc.envelope(1, 1, |outer| {
            outer.envelope(1, 1, |inner| inner.put_u8(0xAA));
        });
        let out = enc.finish();
        // outer body = inner header + 1 byte
        assert_eq!(
            &out[2..10],
            &((ENVELOPE_HEADER_SIZE + 1) as u64).to_le_bytes()
        );
        assert_eq!(out[out.len() - 1], 0xAA);
    }
}
