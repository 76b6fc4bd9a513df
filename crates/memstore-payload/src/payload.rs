use bytes::Bytes;
use memstore_encoding::{Decode, DecodeError, DecodeResult, Decoder, Encode, Encoder};
use tracing::debug;

use crate::buffer::BufferStore;
use crate::page_set::PagedStore;

/// Bytes moved per step when cloning between different store kinds.
const CROSS_CLONE_CHUNK: u64 = 1024 * 1024;

/// Which store backs a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Buffer,
    Paged,
}

impl PayloadKind {
    /// Wire tag.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Buffer => 0,
            Self::Paged => 1,
        }
    }

    pub fn from_u8(tag: u8) -> DecodeResult<Self> {
        match tag {
            0 => Ok(Self::Buffer),
            1 => Ok(Self::Paged),
            other => Err(DecodeError::InvalidValue {
                what: "payload kind",
                value: u64::from(other),
            }),
        }
    }
}

/// Byte storage of one object.
#[derive(Debug)]
pub enum Payload {
    Buffer(BufferStore),
    Paged(PagedStore),
}

impl Payload {
    /// Empty payload of the given kind. `page_size` only applies to paged
    /// payloads.
    pub fn new(kind: PayloadKind, page_size: u64) -> Self {
        match kind {
            PayloadKind::Buffer => Self::Buffer(BufferStore::new()),
            PayloadKind::Paged => Self::Paged(PagedStore::new(page_size)),
        }
    }

    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::Buffer(_) => PayloadKind::Buffer,
            Self::Paged(_) => PayloadKind::Paged,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            Self::Buffer(b) => b.size(),
            Self::Paged(p) => p.size(),
        }
    }

    pub fn read(&self, offset: u64, len: usize) -> Bytes {
        match self {
            Self::Buffer(b) => b.read(offset, len),
            Self::Paged(p) => p.read(offset, len),
        }
    }

    pub fn write(&self, offset: u64, data: &[u8]) {
        match self {
            Self::Buffer(b) => b.write(offset, data),
            Self::Paged(p) => p.write(offset, data),
        }
    }

    pub fn zero(&self, offset: u64, len: u64) {
        match self {
            Self::Buffer(b) => b.zero(offset, len),
            Self::Paged(p) => p.zero(offset, len),
        }
    }

    pub fn truncate(&self, size: u64) {
        match self {
            Self::Buffer(b) => b.truncate(size),
            Self::Paged(p) => p.truncate(size),
        }
    }

    /// Copy `[src_offset, src_offset + len)` of `src` to `dst_offset` of `self`.
    ///
    /// Stores of the same kind use their native clone. Mixed kinds fall back
    /// to chunked read and write.
    pub fn clone_range(&self, src: &Payload, src_offset: u64, len: u64, dst_offset: u64) {
        match (self, src) {
            (Self::Buffer(dst), Self::Buffer(s)) => dst.clone_range(s, src_offset, len, dst_offset),
            (Self::Paged(dst), Self::Paged(s)) => dst.clone_range(s, src_offset, len, dst_offset),
            _ => {
                debug!(
                    src = ?src.kind(),
                    dst = ?self.kind(),
                    len,
                    "cloning across payload kinds"
                );
                let mut done = 0;
                while done < len {
                    let n = CROSS_CLONE_CHUNK.min(len - done);
                    let chunk = src.read(src_offset + done, n as usize);
                    self.write(dst_offset + done, &chunk);
                    done += n;
                }
            }
        }
    }

    /// Decode a payload whose kind was recorded separately.
    pub fn decode(kind: PayloadKind, dec: &mut Decoder<'_>) -> DecodeResult<Self> {
        Ok(match kind {
            PayloadKind::Buffer => Self::Buffer(BufferStore::decode(dec)?),
            PayloadKind::Paged => Self::Paged(PagedStore::decode(dec)?),
        })
    }
}

/// The kind tag is not part of this encoding; see [`Payload::decode`].
impl Encode for Payload {
    fn encode(&self, enc: &mut Encoder) {
        match self {
            Self::Buffer(b) => b.encode(enc),
            Self::Paged(p) => p.encode(enc),
        }
    }
}
