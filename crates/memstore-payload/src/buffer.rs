use bytes::Bytes;
use memstore_encoding::{Decode, DecodeError, DecodeResult, Decoder, Encode, Encoder};
use spin::Mutex;

const BUFFER_VERSION: u8 = 1;
const BUFFER_COMPAT: u8 = 1;

/// Contiguous byte store.
///
/// The whole object lives in one vector guarded by a spinlock; every
/// operation holds the lock for the length of a single copy.
#[derive(Default)]
pub struct BufferStore {
    data: Mutex<Vec<u8>>,
}

impl BufferStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logical size in bytes.
    pub fn size(&self) -> u64 {
        self.data.lock().len() as u64
    }

    /// Read exactly `len` bytes starting at `offset`, zero-filling past the end.
    pub fn read(&self, offset: u64, len: usize) -> Bytes {
        let mut out = vec![0u8; len];
        let data = self.data.lock();
        let size = data.len() as u64;
        if offset < size {
            let n = (size - offset).min(len as u64) as usize;
            let start = offset as usize;
            out[..n].copy_from_slice(&data[start..start + n]);
        }
        Bytes::from(out)
    }

    pub fn write(&self, offset: u64, src: &[u8]) {
        if src.is_empty() {
            return;
        }
        let mut data = self.data.lock();
        let start = offset as usize;
        let end = start + src.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(src);
    }

    pub fn zero(&self, offset: u64, len: u64) {
        if len == 0 {
            return;
        }
        let mut data = self.data.lock();
        let start = offset as usize;
        let end = start + len as usize;
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].fill(0);
    }

    pub fn truncate(&self, size: u64) {
        self.data.lock().resize(size as usize, 0);
    }

    /// Copy a range of `src` into this store.
    pub fn clone_range(&self, src: &BufferStore, src_offset: u64, len: u64, dst_offset: u64) {
        // Reading first releases the source lock before the destination is
        // locked, which also covers `src` and `self` being the same store.
        let chunk = src.read(src_offset, len as usize);
        self.write(dst_offset, &chunk);
    }
}

impl std::fmt::Debug for BufferStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferStore")
            .field("len", &self.size())
            .finish()
    }
}

/// Encoded as the logical size followed by the raw bytes.
impl Encode for BufferStore {
    fn encode(&self, enc: &mut Encoder) {
        let data = self.data.lock();
        enc.envelope(BUFFER_VERSION, BUFFER_COMPAT, |e| {
            e.put_u64(data.len() as u64);
            e.put_bytes(&data);
        });
    }
}

impl Decode for BufferStore {
    /// The size field must match the byte string exactly.
    fn decode(dec: &mut Decoder<'_>) -> DecodeResult<Self> {
        dec.envelope("buffer store", BUFFER_VERSION, |_, d| {
            let len = d.get_u64()?;
            let raw = d.get_slice()?;
            if len != raw.len() as u64 {
                return Err(DecodeError::InvalidValue {
                    what: "buffer length",
                    value: len,
                });
            }
            Ok(Self {
                data: Mutex::new(raw.to_vec()),
            })
        })
    }
}
