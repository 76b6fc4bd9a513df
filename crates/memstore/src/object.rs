use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use memstore_encoding::{Decode, DecodeResult, Decoder, Encode, Encoder};
use memstore_payload::{Payload, PayloadKind};

const OBJECT_VERSION: u8 = 1;
const OBJECT_COMPAT: u8 = 1;

/// Shared handle to an object. Collections and in-flight readers each hold
/// one; the object is dropped with the last handle.
pub type ObjectRef = Arc<Object>;

/// Ordered key/value map attached to an object, plus its header blob.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Omap {
    pub header: Bytes,
    pub entries: BTreeMap<String, Bytes>,
}

/// One stored object: payload bytes, extended attributes and omap.
///
/// The three parts are locked independently. Callers serialize mutations of
/// the same object; the locks make concurrent readers safe.
#[derive(Debug)]
pub struct Object {
    payload: Payload,
    xattrs: Mutex<BTreeMap<String, Bytes>>,
    omap: Mutex<Omap>,
    /// Collection entries currently pointing at this object.
    links: AtomicU64,
}

impl Object {
    /// Create an empty object with the given payload kind.
    pub fn new(kind: PayloadKind, page_size: u64) -> Self {
        Self::from_parts(Payload::new(kind, page_size), BTreeMap::new(), Omap::default())
    }

    fn from_parts(payload: Payload, xattrs: BTreeMap<String, Bytes>, omap: Omap) -> Self {
        Self {
            payload,
            xattrs: Mutex::new(xattrs),
            omap: Mutex::new(omap),
            links: AtomicU64::new(0),
        }
    }

    /// Number of collection entries that link this object.
    pub fn links(&self) -> u64 {
        self.links.load(Ordering::Relaxed)
    }

    pub(crate) fn link(&self) {
        self.links.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn unlink(&self) {
        let _ = self
            .links
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)));
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn kind(&self) -> PayloadKind {
        self.payload.kind()
    }

    pub fn size(&self) -> u64 {
        self.payload.size()
    }

    // -- attributes --

    pub fn getattr(&self, name: &str) -> Option<Bytes> {
        self.xattrs.lock().expect("xattr lock poisoned").get(name).cloned()
    }

    pub fn getattrs(&self) -> BTreeMap<String, Bytes> {
        self.xattrs.lock().expect("xattr lock poisoned").clone()
    }

    pub fn setattrs(&self, attrs: &BTreeMap<String, Bytes>) {
        let mut xattrs = self.xattrs.lock().expect("xattr lock poisoned");
        for (k, v) in attrs {
            xattrs.insert(k.clone(), v.clone());
        }
    }

    /// Remove one attribute. Returns `false` if it was not set.
    pub fn rmattr(&self, name: &str) -> bool {
        self.xattrs
            .lock()
            .expect("xattr lock poisoned")
            .remove(name)
            .is_some()
    }

    pub fn rmattrs(&self) {
        self.xattrs.lock().expect("xattr lock poisoned").clear();
    }

    // -- omap --

    pub fn omap_header(&self) -> Bytes {
        self.omap.lock().expect("omap lock poisoned").header.clone()
    }

    pub fn omap_set_header(&self, header: Bytes) {
        self.omap.lock().expect("omap lock poisoned").header = header;
    }

    /// Copy of the header and all entries.
    pub fn omap(&self) -> Omap {
        self.omap.lock().expect("omap lock poisoned").clone()
    }

    pub fn omap_keys(&self) -> BTreeSet<String> {
        let omap = self.omap.lock().expect("omap lock poisoned");
        omap.entries.keys().cloned().collect()
    }

    /// Values for those of `keys` that are present.
    pub fn omap_values(&self, keys: &BTreeSet<String>) -> BTreeMap<String, Bytes> {
        let omap = self.omap.lock().expect("omap lock poisoned");
        keys.iter()
            .filter_map(|k| omap.entries.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }

    /// The subset of `keys` that are present.
    pub fn omap_check_keys(&self, keys: &BTreeSet<String>) -> BTreeSet<String> {
        let omap = self.omap.lock().expect("omap lock poisoned");
        keys.iter()
            .filter(|k| omap.entries.contains_key(k.as_str()))
            .cloned()
            .collect()
    }

    pub fn omap_set_keys(&self, entries: &BTreeMap<String, Bytes>) {
        let mut omap = self.omap.lock().expect("omap lock poisoned");
        for (k, v) in entries {
            omap.entries.insert(k.clone(), v.clone());
        }
    }

    pub fn omap_rm_keys(&self, keys: &BTreeSet<String>) {
        let mut omap = self.omap.lock().expect("omap lock poisoned");
        for k in keys {
            omap.entries.remove(k);
        }
    }

    /// Remove every key in `[first, last)`.
    pub fn omap_rm_range(&self, first: &str, last: &str) {
        if first >= last {
            return;
        }
        let mut omap = self.omap.lock().expect("omap lock poisoned");
        let doomed: Vec<String> = omap
            .entries
            .range::<str, _>((Bound::Included(first), Bound::Excluded(last)))
            .map(|(k, _)| k.clone())
            .collect();
        for k in doomed {
            omap.entries.remove(&k);
        }
    }

    /// Remove every entry and the header.
    pub fn omap_clear(&self) {
        let mut omap = self.omap.lock().expect("omap lock poisoned");
        omap.entries.clear();
        omap.header = Bytes::new();
    }

    /// First entry at or after `bound`, under the omap lock.
    pub(crate) fn omap_seek(&self, bound: Bound<&str>) -> Option<(String, Bytes)> {
        let omap = self.omap.lock().expect("omap lock poisoned");
        omap.entries
            .range::<str, _>((bound, Bound::Unbounded))
            .next()
            .map(|(k, v)| (k.clone(), v.clone()))
    }

    /// Make `self` an exact copy of `src`: payload bytes, attributes and omap.
    pub fn copy_from(&self, src: &Object) {
        let size = src.size();
        self.payload.truncate(0);
        self.payload.clone_range(&src.payload, 0, size, 0);
        self.payload.truncate(size);

        let attrs = src.getattrs();
        *self.xattrs.lock().expect("xattr lock poisoned") = attrs;
        let omap = src.omap();
        *self.omap.lock().expect("omap lock poisoned") = omap;
    }
}

/// Payload fields first (kind tag, then the store's own encoding), then the
/// attributes, omap header and omap entries.
impl Encode for Object {
    fn encode(&self, enc: &mut Encoder) {
        enc.envelope(OBJECT_VERSION, OBJECT_COMPAT, |e| {
            e.put_u8(self.payload.kind().as_u8());
            self.payload.encode(e);
            e.put(&*self.xattrs.lock().expect("xattr lock poisoned"));
            let omap = self.omap.lock().expect("omap lock poisoned");
            e.put_bytes(&omap.header);
            e.put(&omap.entries);
        });
    }
}

impl Decode for Object {
    fn decode(dec: &mut Decoder<'_>) -> DecodeResult<Self> {
        dec.envelope("object", OBJECT_VERSION, |_, d| {
            let kind = PayloadKind::from_u8(d.get_u8()?)?;
            let payload = Payload::decode(kind, d)?;
            let xattrs = d.get()?;
            let header = d.get_bytes()?;
            let entries = d.get()?;
            Ok(Object::from_parts(payload, xattrs, Omap { header, entries }))
        })
    }
}
