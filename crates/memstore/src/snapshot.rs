//! Whole-store snapshots.
//!
//! A snapshot blob is a versioned envelope holding the store fsid followed by
//! the encoded registry. On disk the blob is framed as:
//!
//! ```text
//! [4 bytes: magic "MSNP"]
//! [4 bytes: blob length (little-endian u32)]
//! [4 bytes: CRC32 of blob (little-endian u32)]
//! [N bytes: blob]
//! ```

use std::fs;
use std::io::Write;
use std::path::Path;

use bytes::Bytes;
use memstore_encoding::{Decode, DecodeError, Decoder, Encoder};
use tracing::debug;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::registry::Registry;

const SNAPSHOT_VERSION: u8 = 1;
const SNAPSHOT_COMPAT: u8 = 1;

/// File magic.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"MSNP";

/// Magic, length and CRC.
const FRAME_HEADER_SIZE: usize = 4 + 4 + 4;

/// Encode the fsid and every collection.
pub fn encode(fsid: &Uuid, registry: &Registry) -> Bytes {
    let mut enc = Encoder::new();
    enc.envelope(SNAPSHOT_VERSION, SNAPSHOT_COMPAT, |e| {
        e.put_bytes(fsid.as_bytes());
        e.put(registry);
    });
    enc.finish()
}

/// Decode a blob produced by [`encode`] into a fresh registry.
pub fn decode(blob: &[u8]) -> StoreResult<(Uuid, Registry)> {
    let mut dec = Decoder::new(blob);
    let out = dec.envelope("snapshot", SNAPSHOT_VERSION, |_, d| {
        let raw = d.get_slice()?;
        let fsid = Uuid::from_slice(raw).map_err(|_| DecodeError::InvalidValue {
            what: "fsid length",
            value: raw.len() as u64,
        })?;
        let registry = Registry::decode(d)?;
        Ok((fsid, registry))
    })?;
    dec.finish()?;
    Ok(out)
}

/// Wrap `blob` in the file frame.
pub fn frame(blob: &[u8]) -> StoreResult<Vec<u8>> {
    let len = u32::try_from(blob.len()).map_err(|_| {
        StoreError::InvalidArgument(format!("snapshot of {} bytes is too large", blob.len()))
    })?;
    let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + blob.len());
    out.extend_from_slice(&SNAPSHOT_MAGIC);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&crc32fast::hash(blob).to_le_bytes());
    out.extend_from_slice(blob);
    Ok(out)
}

/// Check the file frame and return the blob inside it.
pub fn unframe(data: &[u8]) -> StoreResult<&[u8]> {
    if data.len() < FRAME_HEADER_SIZE {
        return Err(DecodeError::Truncated {
            what: "snapshot frame",
            needed: FRAME_HEADER_SIZE as u64,
            available: data.len(),
        }
        .into());
    }
    let (header, rest) = data.split_at(FRAME_HEADER_SIZE);
    let magic: [u8; 4] = [header[0], header[1], header[2], header[3]];
    if magic != SNAPSHOT_MAGIC {
        return Err(DecodeError::BadMagic {
            expected: SNAPSHOT_MAGIC,
            found: magic,
        }
        .into());
    }
    let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let expected = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
    if rest.len() < len {
        return Err(DecodeError::Truncated {
            what: "snapshot blob",
            needed: len as u64,
            available: rest.len(),
        }
        .into());
    }
    if rest.len() > len {
        return Err(DecodeError::TrailingBytes {
            count: rest.len() - len,
        }
        .into());
    }
    let actual = crc32fast::hash(rest);
    if actual != expected {
        return Err(DecodeError::ChecksumMismatch { expected, actual }.into());
    }
    Ok(rest)
}

/// Write a framed blob to `path`, replacing any existing file.
///
/// The frame goes to a sibling temporary file first and is renamed into
/// place, so a crash never leaves a half-written snapshot at `path`.
pub fn write_file(path: &Path, blob: &[u8]) -> StoreResult<()> {
    let framed = frame(blob)?;
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&framed)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), bytes = framed.len(), "snapshot written");
    Ok(())
}

/// Read a framed snapshot file and return the blob.
pub fn read_file(path: &Path) -> StoreResult<Vec<u8>> {
    let data = fs::read(path)?;
    let blob = unframe(&data)?.to_vec();
    debug!(path = %path.display(), bytes = data.len(), "snapshot read");
    Ok(blob)
}

#[cfg(test)]
mod tests {
    use super::*;
    use memstore_types::{CollectionId, ObjectId};

    fn sample() -> (Uuid, Registry) {
        let reg = Registry::new();
        let coll = reg
            .create(&CollectionId::new("2.7_head").unwrap(), true, 4096)
            .unwrap();
        let obj = coll.get_or_create(&ObjectId::new(2, "", "thing"));
        obj.payload().write(10, b"snapshot me");
        reg.recompute_used_bytes();
        (Uuid::new_v4(), reg)
    }

    // -----------------------------------------------------------------------
    // Blob
    // -----------------------------------------------------------------------

    #[test]
    fn blob_preserves_fsid_and_registry() {
        let (fsid, reg) = sample();
        let blob = encode(&fsid, &reg);
        let (back_fsid, back) = decode(&blob).unwrap();
        assert_eq!(back_fsid, fsid);
        assert_eq!(back.list(), reg.list());
        assert_eq!(back.used_bytes(), 21);
    }

    #[test]
    fn blob_with_newer_compat_is_rejected() {
        let (fsid, reg) = sample();
        let mut blob = encode(&fsid, &reg).to_vec();
        blob[1] = SNAPSHOT_COMPAT + 1;
        let err = decode(&blob).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Decode(DecodeError::Incompatible { what: "snapshot", .. })
        ));
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let (fsid, reg) = sample();
        let blob = encode(&fsid, &reg);
        let err = decode(&blob[..blob.len() / 2]).unwrap_err();
        assert!(matches!(err, StoreError::Decode(DecodeError::Truncated { .. })));
    }

    // -----------------------------------------------------------------------
    // Frame
    // -----------------------------------------------------------------------

    #[test]
    fn frame_layout() {
        let framed = frame(b"abc").unwrap();
        assert_eq!(&framed[..4], b"MSNP");
        assert_eq!(&framed[4..8], &3u32.to_le_bytes());
        assert_eq!(&framed[8..12], &crc32fast::hash(b"abc").to_le_bytes());
        assert_eq!(unframe(&framed).unwrap(), b"abc");
    }

    #[test]
    fn unframe_detects_corruption() {
        let mut framed = frame(b"payload").unwrap();
        let last = framed.len() - 1;
        framed[last] ^= 0xFF;
        assert!(matches!(
            unframe(&framed),
            Err(StoreError::Decode(DecodeError::ChecksumMismatch { .. }))
        ));

        let mut bad_magic = frame(b"payload").unwrap();
        bad_magic[0] = b'X';
        assert!(matches!(
            unframe(&bad_magic),
            Err(StoreError::Decode(DecodeError::BadMagic { .. }))
        ));

        assert!(matches!(
            unframe(b"MS"),
            Err(StoreError::Decode(DecodeError::Truncated { .. }))
        ));
    }

    #[test]
    fn file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.snap");
        write_file(&path, b"blob bytes").unwrap();
        assert_eq!(read_file(&path).unwrap(), b"blob bytes");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_file(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
    }
}
