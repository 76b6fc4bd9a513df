use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock, RwLockWriteGuard};

use bytes::Bytes;
use memstore_encoding::{DecodeError, DecodeResult, Decoder, Encode, Encoder};
use memstore_payload::PayloadKind;
use memstore_types::{CollectionId, ObjectId};

use crate::object::{Object, ObjectRef};

const COLLECTION_VERSION: u8 = 1;
const COLLECTION_COMPAT: u8 = 1;

/// Shared handle to a collection.
pub type CollectionRef = Arc<Collection>;

/// Both indices over the same key set. Only ever mutated together.
#[derive(Default)]
struct ObjectIndex {
    by_id: HashMap<ObjectId, ObjectRef>,
    ordered: BTreeMap<ObjectId, ObjectRef>,
}

impl ObjectIndex {
    fn insert(&mut self, oid: ObjectId, obj: ObjectRef) {
        obj.link();
        if let Some(old) = self.by_id.insert(oid.clone(), Arc::clone(&obj)) {
            old.unlink();
        }
        self.ordered.insert(oid, obj);
    }

    fn remove(&mut self, oid: &ObjectId) -> Option<ObjectRef> {
        self.ordered.remove(oid);
        let obj = self.by_id.remove(oid)?;
        obj.unlink();
        Some(obj)
    }
}

/// A named set of objects.
///
/// Objects are indexed twice: a hash map for point lookups and an ordered
/// map for listing in hash-bitwise order. The index lock covers membership
/// only; object contents carry their own locks.
pub struct Collection {
    cid: CollectionId,
    use_page_set: bool,
    page_size: u64,
    index: RwLock<ObjectIndex>,
    xattrs: Mutex<BTreeMap<String, Bytes>>,
}

impl Collection {
    pub fn new(cid: CollectionId, use_page_set: bool, page_size: u64) -> Self {
        Self {
            cid,
            use_page_set,
            page_size,
            index: RwLock::new(ObjectIndex::default()),
            xattrs: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn cid(&self) -> &CollectionId {
        &self.cid
    }

    pub fn use_page_set(&self) -> bool {
        self.use_page_set
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Payload kind given to objects created here.
    pub fn payload_kind(&self) -> PayloadKind {
        if self.use_page_set {
            PayloadKind::Paged
        } else {
            PayloadKind::Buffer
        }
    }

    pub fn get(&self, oid: &ObjectId) -> Option<ObjectRef> {
        self.index
            .read()
            .expect("collection lock poisoned")
            .by_id
            .get(oid)
            .cloned()
    }

    /// Look up `oid`, creating an empty object if it is absent.
    pub fn get_or_create(&self, oid: &ObjectId) -> ObjectRef {
        let mut index = self.index.write().expect("collection lock poisoned");
        if let Some(obj) = index.by_id.get(oid) {
            return Arc::clone(obj);
        }
        let obj = Arc::new(Object::new(self.payload_kind(), self.page_size));
        index.insert(oid.clone(), Arc::clone(&obj));
        obj
    }

    /// Insert `obj` under `oid`. Returns `false`, leaving the index
    /// unchanged, if the key is taken.
    pub fn insert(&self, oid: ObjectId, obj: ObjectRef) -> bool {
        let mut index = self.index.write().expect("collection lock poisoned");
        if index.by_id.contains_key(&oid) {
            return false;
        }
        index.insert(oid, obj);
        true
    }

    pub fn remove(&self, oid: &ObjectId) -> Option<ObjectRef> {
        self.index
            .write()
            .expect("collection lock poisoned")
            .remove(oid)
    }

    pub fn contains(&self, oid: &ObjectId) -> bool {
        self.index
            .read()
            .expect("collection lock poisoned")
            .by_id
            .contains_key(oid)
    }

    pub fn len(&self) -> usize {
        self.index.read().expect("collection lock poisoned").by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of object sizes. Walks every object.
    pub fn used_bytes(&self) -> u64 {
        self.index
            .read()
            .expect("collection lock poisoned")
            .by_id
            .values()
            .map(|obj| obj.size())
            .sum()
    }

    /// Up to `max` object ids in `[start, end)`, in hash-bitwise order.
    ///
    /// The second value is where the next call should start: the first id
    /// not returned, or [`ObjectId::max`] once the range is exhausted.
    pub fn list(&self, start: &ObjectId, end: &ObjectId, max: usize) -> (Vec<ObjectId>, ObjectId) {
        if start >= end {
            return (Vec::new(), ObjectId::max());
        }
        let index = self.index.read().expect("collection lock poisoned");
        let mut range = index.ordered.range(start.clone()..end.clone());
        let out: Vec<ObjectId> = range.by_ref().take(max).map(|(k, _)| k.clone()).collect();
        let next = range
            .next()
            .map(|(k, _)| k.clone())
            .unwrap_or_else(ObjectId::max);
        (out, next)
    }

    /// Every `(id, object)` pair in hash-bitwise order.
    pub fn objects(&self) -> Vec<(ObjectId, ObjectRef)> {
        self.index
            .read()
            .expect("collection lock poisoned")
            .ordered
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }

    /// Move every object whose id matches `(bits, rem)` into `dest`.
    ///
    /// Both index locks are held for the whole move, taken in collection id
    /// order. Returns the number of objects moved.
    pub fn split_into(&self, dest: &Collection, bits: u32, rem: u32) -> usize {
        if std::ptr::eq(self, dest) {
            return 0;
        }
        let (mut src_index, mut dst_index) = lock_pair(self, dest);
        let moving: Vec<ObjectId> = src_index
            .ordered
            .keys()
            .filter(|oid| oid.matches(bits, rem))
            .cloned()
            .collect();
        for oid in &moving {
            if let Some(obj) = src_index.remove(oid) {
                dst_index.insert(oid.clone(), obj);
            }
        }
        moving.len()
    }

    // -- collection attributes --

    pub fn getattr(&self, name: &str) -> Option<Bytes> {
        self.xattrs.lock().expect("xattr lock poisoned").get(name).cloned()
    }

    pub fn getattrs(&self) -> BTreeMap<String, Bytes> {
        self.xattrs.lock().expect("xattr lock poisoned").clone()
    }

    pub fn setattr(&self, name: &str, value: Bytes) {
        self.xattrs
            .lock()
            .expect("xattr lock poisoned")
            .insert(name.to_string(), value);
    }

    pub fn rmattr(&self, name: &str) -> bool {
        self.xattrs
            .lock()
            .expect("xattr lock poisoned")
            .remove(name)
            .is_some()
    }

    /// Decode a collection previously written with [`Encode`]. The id is
    /// stored by the enclosing registry, not by the collection itself.
    pub fn decode(cid: CollectionId, dec: &mut Decoder<'_>) -> DecodeResult<Self> {
        dec.envelope("collection", COLLECTION_VERSION, |_, d| {
            let xattrs: BTreeMap<String, Bytes> = d.get()?;
            let use_page_set = d.get_bool()?;
            let page_size = d.get_u64()?;
            if !page_size.is_power_of_two() {
                return Err(DecodeError::InvalidValue {
                    what: "collection page size",
                    value: page_size,
                });
            }
            let count = d.get_count()?;
            let mut index = ObjectIndex::default();
            for _ in 0..count {
                let oid: ObjectId = d.get()?;
                let obj: Object = d.get()?;
                index.insert(oid, Arc::new(obj));
            }
            if index.by_id.len() as u64 != count {
                return Err(DecodeError::InvalidValue {
                    what: "duplicate object count",
                    value: count,
                });
            }
            Ok(Collection {
                cid,
                use_page_set,
                page_size,
                index: RwLock::new(index),
                xattrs: Mutex::new(xattrs),
            })
        })
    }
}

/// Write-lock two distinct collections' indices in collection id order.
fn lock_pair<'a>(
    a: &'a Collection,
    b: &'a Collection,
) -> (RwLockWriteGuard<'a, ObjectIndex>, RwLockWriteGuard<'a, ObjectIndex>) {
    if a.cid <= b.cid {
        let ga = a.index.write().expect("collection lock poisoned");
        let gb = b.index.write().expect("collection lock poisoned");
        (ga, gb)
    } else {
        let gb = b.index.write().expect("collection lock poisoned");
        let ga = a.index.write().expect("collection lock poisoned");
        (ga, gb)
    }
}

/// Attributes, payload flag, page size, object count, then each
/// `(id, object)` pair in hash-bitwise order.
impl Encode for Collection {
    fn encode(&self, enc: &mut Encoder) {
        enc.envelope(COLLECTION_VERSION, COLLECTION_COMPAT, |e| {
            e.put(&*self.xattrs.lock().expect("xattr lock poisoned"));
            e.put_bool(self.use_page_set);
            e.put_u64(self.page_size);
            let index = self.index.read().expect("collection lock poisoned");
            e.put_len(index.ordered.len());
            for (oid, obj) in &index.ordered {
                e.put(oid);
                e.put(obj.as_ref());
            }
        });
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("cid", &self.cid)
            .field("use_page_set", &self.use_page_set)
            .field("objects", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memstore_encoding::to_bytes;

    fn coll(paged: bool) -> Collection {
        Collection::new(CollectionId::new("1.0_head").unwrap(), paged, 4096)
    }

    fn oid(name: &str) -> ObjectId {
        ObjectId::new(1, "", name)
    }

    // -----------------------------------------------------------------------
    // Index
    // -----------------------------------------------------------------------

    #[test]
    fn get_or_create_is_idempotent() {
        let c = coll(true);
        let a = c.get_or_create(&oid("a"));
        let b = c.get_or_create(&oid("a"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(c.len(), 1);
        assert_eq!(a.kind(), PayloadKind::Paged);
    }

    #[test]
    fn get_never_creates() {
        let c = coll(false);
        assert!(c.get(&oid("a")).is_none());
        assert!(c.is_empty());
    }

    #[test]
    fn remove_updates_both_indices() {
        let c = coll(false);
        c.get_or_create(&oid("a"));
        c.get_or_create(&oid("b"));
        assert!(c.remove(&oid("a")).is_some());
        assert!(c.get(&oid("a")).is_none());
        assert_eq!(c.objects().len(), 1);
        let (listed, _) = c.list(&ObjectId::min(), &ObjectId::max(), 10);
        assert_eq!(listed, vec![oid("b")]);
    }

    #[test]
    fn removed_object_outlives_index_entry() {
        let c = coll(false);
        let held = c.get_or_create(&oid("a"));
        held.payload().write(0, b"still here");
        c.remove(&oid("a"));
        assert_eq!(&held.payload().read(0, 10)[..], b"still here");
    }

    #[test]
    fn insert_rejects_taken_key() {
        let c = coll(false);
        let obj = c.get_or_create(&oid("a"));
        assert!(!c.insert(oid("a"), Arc::clone(&obj)));
        assert!(c.insert(oid("b"), obj));
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn used_bytes_sums_sizes() {
        let c = coll(true);
        c.get_or_create(&oid("a")).payload().write(0, &[1; 100]);
        c.get_or_create(&oid("b")).payload().write(50, &[1; 10]);
        assert_eq!(c.used_bytes(), 160);
    }

    // -----------------------------------------------------------------------
    // Listing
    // -----------------------------------------------------------------------

    #[test]
    fn list_pages_through_everything_once() {
        let c = coll(false);
        for i in 0..37 {
            c.get_or_create(&oid(&format!("obj{i}")));
        }
        let mut seen = Vec::new();
        let mut cursor = ObjectId::min();
        loop {
            let (batch, next) = c.list(&cursor, &ObjectId::max(), 5);
            seen.extend(batch);
            if next.is_max() {
                break;
            }
            cursor = next;
        }
        assert_eq!(seen.len(), 37);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn list_from_min_includes_negative_shards() {
        let c = coll(false);
        for shard in [-1i8, -7, i8::MIN] {
            c.get_or_create(&oid("s").with_shard(shard));
        }
        let (batch, next) = c.list(&ObjectId::min(), &ObjectId::max(), 10);
        assert_eq!(batch.len(), 3);
        assert!(next.is_max());
    }

    #[test]
    fn list_respects_end_bound() {
        let c = coll(false);
        for i in 0..10 {
            c.get_or_create(&oid(&format!("o{i}")));
        }
        let all: Vec<ObjectId> = c.objects().into_iter().map(|(k, _)| k).collect();
        let (batch, next) = c.list(&all[2], &all[5], 100);
        assert_eq!(batch, all[2..5].to_vec());
        assert!(next.is_max());
        let (empty, next) = c.list(&all[5], &all[2], 100);
        assert!(empty.is_empty());
        assert!(next.is_max());
    }

    // -----------------------------------------------------------------------
    // Split
    // -----------------------------------------------------------------------

    #[test]
    fn split_moves_matching_objects() {
        let src = coll(false);
        let dst = Collection::new(CollectionId::new("1.1_head").unwrap(), false, 4096);
        for i in 0..4u32 {
            let id = ObjectId::new(1, "", format!("o{i}")).with_hash(i);
            src.get_or_create(&id);
        }
        let moved = src.split_into(&dst, 1, 1);
        assert_eq!(moved, 2);
        assert!(dst.objects().iter().all(|(k, _)| k.hash & 1 == 1));
        assert!(src.objects().iter().all(|(k, _)| k.hash & 1 == 0));
        // Reverse direction takes locks in the other order.
        assert_eq!(dst.split_into(&src, 0, 0), 2);
        assert_eq!(src.len(), 4);
    }

    // -----------------------------------------------------------------------
    // Encoding
    // -----------------------------------------------------------------------

    #[test]
    fn encoding_preserves_contents() {
        let c = coll(true);
        c.setattr("k", Bytes::from_static(b"v"));
        for i in 0..5 {
            let obj = c.get_or_create(&oid(&format!("x{i}")));
            obj.payload().write(i * 1000, b"abc");
            obj.omap_set_header(Bytes::from(format!("h{i}")));
            obj.setattrs(&BTreeMap::from([
                ("_".to_string(), Bytes::from(format!("oi{i}"))),
                ("snapset".to_string(), Bytes::from_static(b"ss")),
            ]));
        }
        let bytes = to_bytes(&c);
        let mut dec = Decoder::new(&bytes);
        let back = Collection::decode(c.cid().clone(), &mut dec).unwrap();
        dec.finish().unwrap();

        assert!(back.use_page_set());
        assert_eq!(back.page_size(), 4096);
        assert_eq!(back.getattrs(), c.getattrs());
        let before = c.objects();
        let after = back.objects();
        assert_eq!(before.len(), after.len());
        for ((ka, a), (kb, b)) in before.iter().zip(after.iter()) {
            assert_eq!(ka, kb);
            assert_eq!(a.size(), b.size());
            assert_eq!(a.payload().read(0, a.size() as usize), b.payload().read(0, b.size() as usize));
            assert_eq!(a.omap(), b.omap());
            assert_eq!(a.getattrs(), b.getattrs());
            assert_eq!(b.getattrs().len(), 2);
            assert_eq!(b.links(), 1);
        }
    }

    #[test]
    fn decode_truncated_fails() {
        let c = coll(false);
        c.get_or_create(&oid("a")).payload().write(0, b"xyz");
        let bytes = to_bytes(&c);
        let mut dec = Decoder::new(&bytes[..bytes.len() - 2]);
        let res = Collection::decode(c.cid().clone(), &mut dec);
        assert!(matches!(res, Err(DecodeError::Truncated { .. })));
    }
}
