use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use memstore_encoding::{Decode, DecodeError, DecodeResult, Decoder, Encode, Encoder};

use crate::scratch::with_page_scratch;

/// Default page size: 64 KiB.
pub const DEFAULT_PAGE_SIZE: u64 = 64 * 1024;

/// Pages gathered per step when cloning, bounding the scratch vector.
const CLONE_BATCH_PAGES: u64 = 16;

const PAGE_SET_VERSION: u8 = 1;

/// One fixed-size page of object data.
#[derive(Clone, PartialEq, Eq)]
pub struct Page {
    data: Box<[u8]>,
}

impl Page {
    /// A page of `size` zero bytes.
    pub fn zeroed(size: u64) -> Self {
        Self {
            data: vec![0u8; size as usize].into_boxed_slice(),
        }
    }

    fn from_slice(data: &[u8]) -> Self {
        Self { data: data.into() }
    }

    /// The page contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page").field("len", &self.data.len()).finish()
    }
}

/// Shared handle to a page. A page referenced by more than one store is
/// copied before it is modified.
pub type PageRef = Arc<Page>;

#[derive(Default)]
struct PageSetState {
    /// Allocated pages keyed by the byte offset of their first byte.
    pages: BTreeMap<u64, PageRef>,
    /// Logical object size.
    len: u64,
}

/// Sparse paged byte store.
///
/// Data is split into pages of a fixed power-of-two size. Pages are created
/// on the first write that touches them; a page that was never written (or
/// was discarded by `truncate` or `zero`) has no storage and reads as zeros.
/// Bytes at or past the logical size are always zero inside allocated pages,
/// so growing the object never exposes stale data.
pub struct PagedStore {
    page_size: u64,
    state: RwLock<PageSetState>,
}

impl PagedStore {
    /// Create an empty store with the given page size.
    ///
    /// # Panics
    ///
    /// Panics if `page_size` is zero or not a power of two. Configuration is
    /// validated before stores are created.
    pub fn new(page_size: u64) -> Self {
        assert!(
            page_size.is_power_of_two(),
            "page size must be a non-zero power of two, got {page_size}"
        );
        Self {
            page_size,
            state: RwLock::new(PageSetState::default()),
        }
    }

    /// Bytes per page.
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Logical size in bytes.
    pub fn size(&self) -> u64 {
        self.state.read().expect("page set lock poisoned").len
    }

    /// Number of allocated pages.
    pub fn page_count(&self) -> usize {
        self.state.read().expect("page set lock poisoned").pages.len()
    }

    fn page_floor(&self, offset: u64) -> u64 {
        offset & !(self.page_size - 1)
    }

    /// Read exactly `len` bytes starting at `offset`.
    pub fn read(&self, offset: u64, len: usize) -> Bytes {
        let mut out = vec![0u8; len];
        if len == 0 {
            return Bytes::from(out);
        }
        let end = offset.saturating_add(len as u64);
        let state = self.state.read().expect("page set lock poisoned");
        for (&page_off, page) in state.pages.range(self.page_floor(offset)..end) {
            let start = offset.max(page_off);
            let stop = end.min(page_off + self.page_size);
            out[(start - offset) as usize..(stop - offset) as usize].copy_from_slice(
                &page.data[(start - page_off) as usize..(stop - page_off) as usize],
            );
        }
        Bytes::from(out)
    }

    /// Write `data` at `offset`, allocating pages as needed.
    pub fn write(&self, offset: u64, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let mut state = self.state.write().expect("page set lock poisoned");
        let end = offset + data.len() as u64;
        let mut pos = offset;
        while pos < end {
            let page_off = self.page_floor(pos);
            let in_page = pos - page_off;
            let n = (self.page_size - in_page).min(end - pos);
            let src = &data[(pos - offset) as usize..(pos - offset + n) as usize];
            if n == self.page_size {
                // Whole-page overwrite: replace rather than copy-on-write.
                state.pages.insert(page_off, Arc::new(Page::from_slice(src)));
            } else {
                let page = state
                    .pages
                    .entry(page_off)
                    .or_insert_with(|| Arc::new(Page::zeroed(self.page_size)));
                Arc::make_mut(page).data[in_page as usize..(in_page + n) as usize]
                    .copy_from_slice(src);
            }
            pos += n;
        }
        state.len = state.len.max(end);
    }

    /// Zero `[offset, offset + len)`, extending the logical size to cover it.
    ///
    /// Pages entirely inside the range are released; partially covered
    /// pages are zeroed in place.
    pub fn zero(&self, offset: u64, len: u64) {
        if len == 0 {
            return;
        }
        let mut state = self.state.write().expect("page set lock poisoned");
        let end = offset.saturating_add(len);
        let mut pos = offset;
        while pos < end {
            let page_off = self.page_floor(pos);
            let in_page = pos - page_off;
            let n = (self.page_size - in_page).min(end - pos);
            if n == self.page_size {
                state.pages.remove(&page_off);
            } else if let Some(page) = state.pages.get_mut(&page_off) {
                Arc::make_mut(page).data[in_page as usize..(in_page + n) as usize].fill(0);
            }
            pos += n;
        }
        state.len = state.len.max(end);
    }

    /// Resize to `size` bytes.
    pub fn truncate(&self, size: u64) {
        let mut state = self.state.write().expect("page set lock poisoned");
        // Drop every page that starts at or after the new end.
        drop(state.pages.split_off(&size));
        let page_off = self.page_floor(size);
        if page_off != size {
            if let Some(page) = state.pages.get_mut(&page_off) {
                Arc::make_mut(page).data[(size - page_off) as usize..].fill(0);
            }
        }
        state.len = size;
    }

    /// Copy `[src_offset, src_offset + len)` of `src` to `dst_offset` of `self`.
    ///
    /// When both stores use the same page size and the offsets are equally
    /// aligned, destination pages that are fully covered by the range share
    /// the source page instead of copying it. Otherwise the bytes are copied
    /// in batches of pages.
    pub fn clone_range(&self, src: &PagedStore, src_offset: u64, len: u64, dst_offset: u64) {
        if len == 0 {
            return;
        }
        if std::ptr::eq(self, src) {
            let data = self.read(src_offset, len as usize);
            self.write(dst_offset, &data);
            return;
        }
        let aligned = self.page_size == src.page_size
            && src_offset % self.page_size == dst_offset % self.page_size;
        let batch = self.page_size * CLONE_BATCH_PAGES;
        let mut done = 0u64;
        while done < len {
            let count = batch.min(len - done);
            if aligned {
                self.share_from(src, src_offset + done, count, dst_offset + done);
            } else {
                let data = src.read(src_offset + done, count as usize);
                self.write(dst_offset + done, &data);
            }
            done += count;
        }
    }

    /// One aligned clone step: gather source pages, then apply them.
    fn share_from(&self, src: &PagedStore, src_offset: u64, len: u64, dst_offset: u64) {
        with_page_scratch(|src_pages| {
            {
                let src_state = src.state.read().expect("page set lock poisoned");
                src_pages.extend(
                    src_state
                        .pages
                        .range(src.page_floor(src_offset)..src_offset + len)
                        .map(|(&off, page)| (off, Arc::clone(page))),
                );
            }

            let mut state = self.state.write().expect("page set lock poisoned");
            let end = dst_offset + len;
            let mut pos = dst_offset;
            while pos < end {
                let page_off = self.page_floor(pos);
                let in_page = pos - page_off;
                let n = (self.page_size - in_page).min(end - pos);
                let src_page_off = page_off + src_offset - dst_offset;
                let src_page = src_pages
                    .binary_search_by_key(&src_page_off, |(off, _)| *off)
                    .ok()
                    .map(|i| &src_pages[i].1);
                match (src_page, n == self.page_size) {
                    (Some(page), true) => {
                        state.pages.insert(page_off, Arc::clone(page));
                    }
                    (None, true) => {
                        state.pages.remove(&page_off);
                    }
                    (Some(page), false) => {
                        let range = in_page as usize..(in_page + n) as usize;
                        let dst = state
                            .pages
                            .entry(page_off)
                            .or_insert_with(|| Arc::new(Page::zeroed(self.page_size)));
                        Arc::make_mut(dst).data[range.clone()].copy_from_slice(&page.data[range]);
                    }
                    (None, false) => {
                        if let Some(dst) = state.pages.get_mut(&page_off) {
                            Arc::make_mut(dst).data[in_page as usize..(in_page + n) as usize]
                                .fill(0);
                        }
                    }
                }
                pos += n;
            }
            state.len = state.len.max(end);
        });
    }

    #[cfg(test)]
    fn page_at(&self, offset: u64) -> Option<PageRef> {
        self.state
            .read()
            .expect("page set lock poisoned")
            .pages
            .get(&offset)
            .cloned()
    }
}

impl std::fmt::Debug for PagedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().expect("page set lock poisoned");
        f.debug_struct("PagedStore")
            .field("page_size", &self.page_size)
            .field("len", &state.len)
            .field("pages", &state.pages.len())
            .finish()
    }
}

/// Encoded as the logical size followed by the page set envelope
/// (page size, page count, then `(offset, bytes)` per allocated page).
impl Encode for PagedStore {
    fn encode(&self, enc: &mut Encoder) {
        let state = self.state.read().expect("page set lock poisoned");
        enc.put_u64(state.len);
        enc.envelope(PAGE_SET_VERSION, 1, |e| {
            e.put_u64(self.page_size);
            e.put_len(state.pages.len());
            for (&off, page) in &state.pages {
                e.put_u64(off);
                e.put_bytes(&page.data);
            }
        });
    }
}

impl Decode for PagedStore {
    fn decode(dec: &mut Decoder<'_>) -> DecodeResult<Self> {
        let len = dec.get_u64()?;
        let (page_size, pages) = dec.envelope("page set", PAGE_SET_VERSION, |_, d| {
            let page_size = d.get_u64()?;
            if !page_size.is_power_of_two() {
                return Err(DecodeError::InvalidValue {
                    what: "page size",
                    value: page_size,
                });
            }
            let count = d.get_count()?;
            let mut pages = BTreeMap::new();
            for _ in 0..count {
                let off = d.get_u64()?;
                if off % page_size != 0 || off >= len {
                    return Err(DecodeError::InvalidValue {
                        what: "page offset",
                        value: off,
                    });
                }
                let data = d.get_slice()?;
                if data.len() as u64 != page_size {
                    return Err(DecodeError::InvalidValue {
                        what: "page length",
                        value: data.len() as u64,
                    });
                }
                pages.insert(off, Arc::new(Page::from_slice(data)));
            }
            Ok((page_size, pages))
        })?;
        Ok(Self {
            page_size,
            state: RwLock::new(PageSetState { pages, len }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const PS: u64 = 4096;

    fn filled(len: usize, byte: u8) -> Vec<u8> {
        vec![byte; len]
    }

    // -----------------------------------------------------------------------
    // Read / write
    // -----------------------------------------------------------------------

    #[test]
    fn empty_store_reads_zeros() {
        let store = PagedStore::new(PS);
        assert_eq!(store.size(), 0);
        assert_eq!(&store.read(100, 10)[..], &[0u8; 10]);
        assert_eq!(store.page_count(), 0);
    }

    #[test]
    fn write_spanning_pages() {
        let store = PagedStore::new(PS);
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        store.write(1000, &data);
        assert_eq!(store.size(), 11_000);
        assert_eq!(store.page_count(), 3);
        assert_eq!(&store.read(1000, data.len())[..], &data[..]);
        assert_eq!(&store.read(0, 1000)[..], &filled(1000, 0)[..]);
    }

    #[test]
    fn sparse_write_leaves_hole() {
        let store = PagedStore::new(PS);
        store.write(3 * PS, b"tail");
        assert_eq!(store.size(), 3 * PS + 4);
        assert_eq!(store.page_count(), 1);
        let all = store.read(0, (3 * PS + 4) as usize);
        assert!(all[..(3 * PS) as usize].iter().all(|&b| b == 0));
        assert_eq!(&all[(3 * PS) as usize..], b"tail");
    }

    #[test]
    fn read_past_end_is_zero_filled() {
        let store = PagedStore::new(PS);
        store.write(0, b"abc");
        let out = store.read(1, 8);
        assert_eq!(&out[..], b"bc\0\0\0\0\0\0");
    }

    // -----------------------------------------------------------------------
    // Truncate / zero
    // -----------------------------------------------------------------------

    #[test]
    fn truncate_within_page_zeroes_tail() {
        let store = PagedStore::new(PS);
        store.write(0, &filled(8192, 0xAB));
        assert_eq!(&store.read(4096, 10)[..], &[0xAB; 10]);

        store.truncate(4100);
        assert_eq!(store.size(), 4100);
        assert_eq!(store.page_count(), 2);
        let out = store.read(4096, 10);
        assert_eq!(&out[..4], &[0xAB; 4]);
        assert_eq!(&out[4..], &[0u8; 6]);
    }

    #[test]
    fn truncate_shrink_then_grow_reads_zero() {
        let store = PagedStore::new(PS);
        store.write(0, &filled(3 * PS as usize, 0x11));
        store.truncate(100);
        store.truncate(2 * PS);
        assert_eq!(store.size(), 2 * PS);
        let out = store.read(100, (2 * PS - 100) as usize);
        assert!(out.iter().all(|&b| b == 0));
        assert_eq!(&store.read(0, 100)[..], &filled(100, 0x11)[..]);
    }

    #[test]
    fn truncate_on_page_boundary_drops_pages() {
        let store = PagedStore::new(PS);
        store.write(0, &filled(3 * PS as usize, 1));
        store.truncate(PS);
        assert_eq!(store.page_count(), 1);
        store.truncate(0);
        assert_eq!(store.page_count(), 0);
        assert_eq!(store.size(), 0);
    }

    #[test]
    fn zero_releases_whole_pages() {
        let store = PagedStore::new(PS);
        store.write(0, &filled(3 * PS as usize, 9));
        store.zero(100, 2 * PS);
        assert_eq!(store.size(), 3 * PS);
        // Page 1 fully covered and released; pages 0 and 2 zeroed in part.
        assert_eq!(store.page_count(), 2);
        assert_eq!(&store.read(0, 100)[..], &filled(100, 9)[..]);
        assert!(store.read(100, (2 * PS) as usize).iter().all(|&b| b == 0));
        assert_eq!(store.read(2 * PS + 100, 1)[0], 9);
    }

    #[test]
    fn zero_past_end_extends() {
        let store = PagedStore::new(PS);
        store.zero(10, 20);
        assert_eq!(store.size(), 30);
        assert_eq!(store.page_count(), 0);
    }

    // -----------------------------------------------------------------------
    // Clone
    // -----------------------------------------------------------------------

    #[test]
    fn aligned_clone_shares_pages() {
        let src = PagedStore::new(PS);
        src.write(0, &filled(2 * PS as usize, 0x5A));
        let dst = PagedStore::new(PS);
        dst.clone_range(&src, 0, 2 * PS, 4 * PS);
        assert_eq!(dst.size(), 6 * PS);
        let shared = dst.page_at(4 * PS).unwrap();
        assert!(Arc::ptr_eq(&shared, &src.page_at(0).unwrap()));
    }

    #[test]
    fn clone_is_isolated_from_later_source_writes() {
        let src = PagedStore::new(PS);
        src.write(0, &filled(2 * PS as usize, 0x01));
        let dst = PagedStore::new(PS);
        dst.clone_range(&src, 0, 2 * PS, 0);

        src.write(10, b"changed");
        assert_eq!(&dst.read(10, 7)[..], &[0x01; 7]);

        dst.write(PS, b"dst");
        assert_eq!(&src.read(PS, 3)[..], &[0x01; 3]);
    }

    #[test]
    fn clone_hole_clears_destination() {
        let src = PagedStore::new(PS);
        src.write(2 * PS, b"x");
        let dst = PagedStore::new(PS);
        dst.write(0, &filled(PS as usize, 7));
        dst.clone_range(&src, 0, PS, 0);
        assert_eq!(dst.page_count(), 0);
        assert!(dst.read(0, PS as usize).iter().all(|&b| b == 0));
    }

    #[test]
    fn unaligned_clone_copies_bytes() {
        let src = PagedStore::new(PS);
        let data: Vec<u8> = (0..PS as usize * 2).map(|i| i as u8).collect();
        src.write(0, &data);
        let dst = PagedStore::new(PS);
        dst.clone_range(&src, 3, 5000, 10);
        assert_eq!(&dst.read(10, 5000)[..], &data[3..5003]);
        assert_eq!(dst.size(), 5010);
    }

    #[test]
    fn clone_between_page_sizes() {
        let src = PagedStore::new(1024);
        src.write(0, &filled(5000, 3));
        let dst = PagedStore::new(PS);
        dst.clone_range(&src, 0, 5000, 0);
        assert_eq!(&dst.read(0, 5000)[..], &filled(5000, 3)[..]);
    }

    #[test]
    fn clone_within_same_store() {
        let store = PagedStore::new(PS);
        store.write(0, b"hello");
        store.clone_range(&store, 0, 5, PS + 1);
        assert_eq!(&store.read(PS + 1, 5)[..], b"hello");
    }

    #[test]
    fn large_clone_runs_in_batches() {
        let src = PagedStore::new(1024);
        let data: Vec<u8> = (0..40 * 1024usize).map(|i| (i / 1024) as u8).collect();
        src.write(0, &data);
        let dst = PagedStore::new(1024);
        dst.clone_range(&src, 0, data.len() as u64, 0);
        assert_eq!(&dst.read(0, data.len())[..], &data[..]);
        assert_eq!(dst.page_count(), 40);
    }

    // -----------------------------------------------------------------------
    // Encoding
    // -----------------------------------------------------------------------

    #[test]
    fn encode_decode_preserves_sparse_layout() {
        let store = PagedStore::new(PS);
        store.write(5, b"head");
        store.write(5 * PS, b"far");
        let bytes = memstore_encoding::to_bytes(&store);
        let decoded: PagedStore = memstore_encoding::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.page_size(), PS);
        assert_eq!(decoded.size(), store.size());
        assert_eq!(decoded.page_count(), 2);
        assert_eq!(&decoded.read(5, 4)[..], b"head");
        assert_eq!(&decoded.read(5 * PS, 3)[..], b"far");
    }

    #[test]
    fn decode_rejects_misaligned_page() {
        let mut enc = Encoder::new();
        enc.put_u64(10);
        enc.envelope(1, 1, |e| {
            e.put_u64(16);
            e.put_len(1);
            e.put_u64(3);
            e.put_bytes(&[0u8; 16]);
        });
        let bytes = enc.finish();
        let res: DecodeResult<PagedStore> = memstore_encoding::from_bytes(&bytes);
        assert_eq!(
            res.unwrap_err(),
            DecodeError::InvalidValue {
                what: "page offset",
                value: 3
            }
        );
    }

    #[test]
    fn decode_rejects_truncated_stream() {
        let store = PagedStore::new(PS);
        store.write(0, b"data");
        let bytes = memstore_encoding::to_bytes(&store);
        let res: DecodeResult<PagedStore> =
            memstore_encoding::from_bytes(&bytes[..bytes.len() - 1]);
        assert!(matches!(res, Err(DecodeError::Truncated { .. })));
    }

    proptest! {
        #[test]
        fn write_then_read_returns_written(offset in 0u64..20_000, data in proptest::collection::vec(any::<u8>(), 1..9000)) {
            let store = PagedStore::new(1024);
            store.write(offset, &data);
            prop_assert_eq!(&store.read(offset, data.len())[..], &data[..]);
        }

        #[test]
        fn clone_snapshot_survives_source_writes(
            so in 0u64..5000, dof in 0u64..5000, len in 1u64..6000, byte in any::<u8>()
        ) {
            let src = PagedStore::new(512);
            let seed: Vec<u8> = (0..12_000usize).map(|i| (i % 253) as u8).collect();
            src.write(0, &seed);
            let dst = PagedStore::new(512);
            dst.clone_range(&src, so, len, dof);
            let before = dst.read(dof, len as usize);
            src.write(so, &vec![byte; len as usize]);
            prop_assert_eq!(dst.read(dof, len as usize), before);
        }
    }
}
