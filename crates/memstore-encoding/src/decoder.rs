use bytes::{Buf, Bytes};

use crate::error::{DecodeError, DecodeResult};
use crate::Decode;

/// Cursor over an encoded byte slice.
///
/// Every read is bounds-checked; running off the end yields
/// [`DecodeError::Truncated`] rather than a panic.
#[derive(Debug)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Start decoding `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Returns `true` once every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn need(&self, needed: u64, what: &'static str) -> DecodeResult<()> {
        if needed > self.buf.remaining() as u64 {
            return Err(DecodeError::Truncated {
                what,
                needed,
                available: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn get_u8(&mut self) -> DecodeResult<u8> {
        self.need(1, "u8")?;
        Ok(self.buf.get_u8())
    }

    pub fn get_i8(&mut self) -> DecodeResult<i8> {
        self.need(1, "i8")?;
        Ok(self.buf.get_i8())
    }

    pub fn get_bool(&mut self) -> DecodeResult<bool> {
        match self.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DecodeError::InvalidValue {
                what: "bool",
                value: u64::from(other),
            }),
        }
    }

    pub fn get_u32(&mut self) -> DecodeResult<u32> {
        self.need(4, "u32")?;
        Ok(self.buf.get_u32_le())
    }

    pub fn get_u64(&mut self) -> DecodeResult<u64> {
        self.need(8, "u64")?;
        Ok(self.buf.get_u64_le())
    }

    pub fn get_i64(&mut self) -> DecodeResult<i64> {
        self.need(8, "i64")?;
        Ok(self.buf.get_i64_le())
    }

    /// Element count prefix.
    ///
    /// The count is not checked against the remaining input (elements may
    /// be of any size); callers must not pre-allocate from it blindly.
    pub fn get_count(&mut self) -> DecodeResult<u64> {
        self.get_u64()
    }

    /// Length-prefixed byte string.
    pub fn get_bytes(&mut self) -> DecodeResult<Bytes> {
        let len = self.get_u64()?;
        self.need(len, "byte string")?;
        Ok(self.buf.copy_to_bytes(len as usize))
    }

    /// Length-prefixed byte string, borrowed from the input.
    pub fn get_slice(&mut self) -> DecodeResult<&'a [u8]> {
        let len = self.get_u64()?;
        self.need(len, "byte string")?;
        let (head, tail) = self.buf.split_at(len as usize);
        self.buf = tail;
        Ok(head)
    }

    /// Length-prefixed UTF-8 string.
    pub fn get_string(&mut self) -> DecodeResult<String> {
        let raw = self.get_slice()?;
        String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidUtf8 { what: "string" })
    }

    /// Decode any [`Decode`] value.
    pub fn get<T: Decode>(&mut self) -> DecodeResult<T> {
        T::decode(self)
    }

    /// Read an envelope and decode its body with `body`.
    ///
    /// `supported` is the highest structure version this decoder
    /// implements. The envelope is rejected if its minimum compatible
    /// version is newer, or if its declared body length runs past the end
    /// of the input. `body` receives the encoder's structure version and a
    /// decoder bounded to the body; bytes it leaves unread (fields added by
    /// a newer encoder) are skipped.
    pub fn envelope<T>(
        &mut self,
        what: &'static str,
        supported: u8,
        body: impl FnOnce(u8, &mut Decoder<'a>) -> DecodeResult<T>,
    ) -> DecodeResult<T> {
        self.need(2 + 8, what)?;
        let version = self.buf.get_u8();
        let compat = self.buf.get_u8();
        if compat > supported {
            return Err(DecodeError::Incompatible {
                what,
                compat,
                supported,
            });
        }
        let len = self.buf.get_u64_le();
        self.need(len, what)?;
        let (head, tail) = self.buf.split_at(len as usize);
        let mut inner = Decoder::new(head);
        let value = body(version, &mut inner)?;
        self.buf = tail;
        Ok(value)
    }

    /// Finish a top-level decode, rejecting unread input.
    pub fn finish(self) -> DecodeResult<()> {
        if !self.buf.is_empty() {
            return Err(DecodeError::TrailingBytes {
                count: self.buf.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Encoder;

    #[test]
    fn primitives_roundtrip() {
        let mut enc = Encoder::new();
        enc.put_u8(1);
        enc.put_i8(-2);
        enc.put_bool(true);
        enc.put_u32(3);
        enc.put_u64(4);
        enc.put_i64(-5);
        enc.put_str("six");
        enc.put_bytes(&[7, 7]);
        let out = enc.finish();

        let mut dec = Decoder::new(&out);
        assert_eq!(dec.get_u8().unwrap(), 1);
        assert_eq!(dec.get_i8().unwrap(), -2);
        assert!(dec.get_bool().unwrap());
        assert_eq!(dec.get_u32().unwrap(), 3);
        assert_eq!(dec.get_u64().unwrap(), 4);
        assert_eq!(dec.get_i64().unwrap(), -5);
        assert_eq!(dec.get_string().unwrap(), "six");
        assert_eq!(&dec.get_bytes().unwrap()[..], &[7, 7]);
        dec.finish().unwrap();
    }

    #[test]
    fn truncated_integer() {
        let mut dec = Decoder::new(&[1, 2]);
        assert_eq!(
            dec.get_u32(),
            Err(DecodeError::Truncated {
                what: "u32",
                needed: 4,
                available: 2
            })
        );
    }

    #[test]
    fn truncated_byte_string() {
        let mut enc = Encoder::new();
        enc.put_u64(100);
        enc.put_u8(1);
        let out = enc.finish();
        let mut dec = Decoder::new(&out);
        assert!(matches!(
            dec.get_bytes(),
            Err(DecodeError::Truncated { needed: 100, .. })
        ));
    }

    #[test]
    fn invalid_bool() {
        let mut dec = Decoder::new(&[2]);
        assert_eq!(
            dec.get_bool(),
            Err(DecodeError::InvalidValue {
                what: "bool",
                value: 2
            })
        );
    }

    #[test]
    fn invalid_utf8() {
        let mut enc = Encoder::new();
        enc.put_bytes(&[0xff, 0xfe]);
        let out = enc.finish();
        let mut dec = Decoder::new(&out);
        assert!(matches!(
            dec.get_string(),
            Err(DecodeError::InvalidUtf8 { .. })
        ));
    }

    #[test]
    fn envelope_rejects_newer_compat() {
        let mut enc = Encoder::new();
        enc.envelope(3, 2, |e| e.put_u8(0));
        let out = enc.finish();
        let mut dec = Decoder::new(&out);
        let err = dec
            .envelope("test", 1, |_, d| d.get_u8())
            .unwrap_err();
        assert_eq!(
            err,
            DecodeError::Incompatible {
                what: "test",
                compat: 2,
                supported: 1
            }
        );
    }

    #[test]
    fn envelope_accepts_newer_version_with_old_compat() {
        // A v2 encoder that appended a field but stays readable by v1.
        let mut enc = Encoder::new();
        enc.envelope(2, 1, |e| {
            e.put_u32(11);
            e.put_u64(99);
        });
        enc.put_u8(0xEE);
        let out = enc.finish();

        let mut dec = Decoder::new(&out);
        let (version, value) = dec
            .envelope("test", 1, |v, d| Ok((v, d.get_u32()?)))
            .unwrap();
        assert_eq!(version, 2);
        assert_eq!(value, 11);
        // The unknown u64 was skipped; the next top-level byte follows.
        assert_eq!(dec.get_u8().unwrap(), 0xEE);
        dec.finish().unwrap();
    }

    #[test]
    fn envelope_rejects_length_past_end() {
        let mut enc = Encoder::new();
        enc.envelope(1, 1, |e| e.put_u64(5));
        let mut out = enc.finish().to_vec();
        out.truncate(out.len() - 3);
        let mut dec = Decoder::new(&out);
        assert!(matches!(
            dec.envelope("test", 1, |_, d| d.get_u64()),
            Err(DecodeError::Truncated { what: "test", .. })
        ));
    }

    #[test]
    fn envelope_body_cannot_read_past_its_length() {
        let mut enc = Encoder::new();
        enc.envelope(1, 1, |e| e.put_u8(1));
        enc.put_u64(42);
        let out = enc.finish();
        let mut dec = Decoder::new(&out);
        let res = dec.envelope("test", 1, |_, d| d.get_u64());
        assert!(matches!(res, Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn finish_rejects_trailing_bytes() {
        let dec = Decoder::new(&[1, 2, 3]);
        assert_eq!(dec.finish(), Err(DecodeError::TrailingBytes { count: 3 }));
    }
}
