use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use memstore_encoding::{DecodeError, DecodeResult, Decoder, Encode, Encoder};
use memstore_types::CollectionId;

use crate::collection::{Collection, CollectionRef};
use crate::error::{StoreError, StoreResult};

const REGISTRY_VERSION: u8 = 1;
const REGISTRY_COMPAT: u8 = 1;

/// Collection id to collection map, plus the running byte total.
///
/// `used_bytes` is a cache: it always equals the sum of object sizes over
/// every collection entry, and [`Registry::recompute_used_bytes`] rebuilds it.
#[derive(Default)]
pub struct Registry {
    collections: RwLock<HashMap<CollectionId, CollectionRef>>,
    used_bytes: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, cid: &CollectionId) -> Option<CollectionRef> {
        self.collections
            .read()
            .expect("registry lock poisoned")
            .get(cid)
            .cloned()
    }

    /// Like [`get`](Self::get), but a missing collection is an error.
    pub fn require(&self, cid: &CollectionId) -> StoreResult<CollectionRef> {
        self.get(cid)
            .ok_or_else(|| StoreError::CollectionNotFound(cid.clone()))
    }

    pub fn contains(&self, cid: &CollectionId) -> bool {
        self.collections
            .read()
            .expect("registry lock poisoned")
            .contains_key(cid)
    }

    /// Register a new empty collection.
    pub fn create(
        &self,
        cid: &CollectionId,
        use_page_set: bool,
        page_size: u64,
    ) -> StoreResult<CollectionRef> {
        let mut map = self.collections.write().expect("registry lock poisoned");
        if map.contains_key(cid) {
            return Err(StoreError::CollectionExists(cid.clone()));
        }
        let coll = Arc::new(Collection::new(cid.clone(), use_page_set, page_size));
        map.insert(cid.clone(), Arc::clone(&coll));
        Ok(coll)
    }

    pub fn remove(&self, cid: &CollectionId) -> Option<CollectionRef> {
        self.collections
            .write()
            .expect("registry lock poisoned")
            .remove(cid)
    }

    /// All collection ids, sorted.
    pub fn list(&self) -> Vec<CollectionId> {
        let map = self.collections.read().expect("registry lock poisoned");
        let mut ids: Vec<CollectionId> = map.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.collections.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn used_bytes(&self) -> u64 {
        self.used_bytes.load(Ordering::Relaxed)
    }

    /// Apply the size change of one object.
    pub fn adjust_used(&self, before: u64, after: u64) {
        if after >= before {
            self.used_bytes.fetch_add(after - before, Ordering::Relaxed);
        } else {
            self.sub_used(before - after);
        }
    }

    pub fn add_used(&self, bytes: u64) {
        self.used_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn sub_used(&self, bytes: u64) {
        // Saturate rather than wrap if the cache ever drifts low.
        let _ = self
            .used_bytes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(bytes))
            });
    }

    /// Rebuild `used_bytes` from the object sizes and return it.
    pub fn recompute_used_bytes(&self) -> u64 {
        let total = self
            .collections
            .read()
            .expect("registry lock poisoned")
            .values()
            .map(|c| c.used_bytes())
            .sum();
        self.used_bytes.store(total, Ordering::Relaxed);
        total
    }

    /// Replace this registry's contents with `other`'s.
    pub fn replace_with(&self, other: Registry) {
        let Registry {
            collections,
            used_bytes,
        } = other;
        let collections = collections.into_inner().expect("registry lock poisoned");
        *self.collections.write().expect("registry lock poisoned") = collections;
        self.used_bytes
            .store(used_bytes.into_inner(), Ordering::Relaxed);
    }
}

/// Collection count, then `(id, collection)` pairs sorted by id.
impl Encode for Registry {
    fn encode(&self, enc: &mut Encoder) {
        let map = self.collections.read().expect("registry lock poisoned");
        let mut entries: Vec<(&CollectionId, &CollectionRef)> = map.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        enc.envelope(REGISTRY_VERSION, REGISTRY_COMPAT, |e| {
            e.put_len(entries.len());
            for (cid, coll) in entries {
                e.put(cid);
                e.put(coll.as_ref());
            }
        });
    }
}

impl memstore_encoding::Decode for Registry {
    /// Decodes every collection and recomputes `used_bytes`.
    fn decode(dec: &mut Decoder<'_>) -> DecodeResult<Self> {
        let collections = dec.envelope("registry", REGISTRY_VERSION, |_, d| {
            let count = d.get_count()?;
            let mut map = HashMap::new();
            for _ in 0..count {
                let cid: CollectionId = d.get()?;
                let coll = Collection::decode(cid.clone(), d)?;
                if map.insert(cid, Arc::new(coll)).is_some() {
                    return Err(DecodeError::InvalidValue {
                        what: "duplicate collection count",
                        value: count,
                    });
                }
            }
            Ok(map)
        })?;
        let registry = Registry {
            collections: RwLock::new(collections),
            used_bytes: AtomicU64::new(0),
        };
        registry.recompute_used_bytes();
        Ok(registry)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("collections", &self.len())
            .field("used_bytes", &self.used_bytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memstore_encoding::{from_bytes, to_bytes};
    use memstore_types::ObjectId;

    fn cid(name: &str) -> CollectionId {
        CollectionId::new(name).unwrap()
    }

    #[test]
    fn create_rejects_duplicate() {
        let reg = Registry::new();
        reg.create(&cid("a"), true, 4096).unwrap();
        assert!(matches!(
            reg.create(&cid("a"), true, 4096),
            Err(StoreError::CollectionExists(_))
        ));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn list_is_sorted() {
        let reg = Registry::new();
        for name in ["c", "a", "b"] {
            reg.create(&cid(name), false, 4096).unwrap();
        }
        assert_eq!(reg.list(), vec![cid("a"), cid("b"), cid("c")]);
    }

    #[test]
    fn require_reports_missing() {
        let reg = Registry::new();
        assert!(matches!(
            reg.require(&cid("nope")),
            Err(StoreError::CollectionNotFound(_))
        ));
    }

    #[test]
    fn used_bytes_adjusts_and_saturates() {
        let reg = Registry::new();
        reg.adjust_used(0, 100);
        reg.adjust_used(100, 40);
        assert_eq!(reg.used_bytes(), 40);
        reg.sub_used(1000);
        assert_eq!(reg.used_bytes(), 0);
    }

    #[test]
    fn decode_recomputes_used_bytes() {
        let reg = Registry::new();
        let coll = reg.create(&cid("p"), true, 4096).unwrap();
        coll.get_or_create(&ObjectId::new(0, "", "x"))
            .payload()
            .write(0, &[7; 300]);
        // Deliberately stale cache.
        reg.add_used(5);

        let back: Registry = from_bytes(&to_bytes(&reg)).unwrap();
        assert_eq!(back.used_bytes(), 300);
        assert_eq!(back.list(), vec![cid("p")]);
    }

    #[test]
    fn replace_with_swaps_contents() {
        let reg = Registry::new();
        reg.create(&cid("old"), true, 4096).unwrap();
        let fresh = Registry::new();
        fresh.create(&cid("new"), true, 4096).unwrap();
        fresh.add_used(9);
        reg.replace_with(fresh);
        assert_eq!(reg.list(), vec![cid("new")]);
        assert_eq!(reg.used_bytes(), 9);
    }
}
