use std::ops::Bound;

use bytes::Bytes;

use crate::object::ObjectRef;

/// Cursor over one object's omap.
///
/// No lock is held between calls. Each positioning call takes the omap lock,
/// finds its entry relative to the remembered key and releases the lock, so
/// concurrent omap mutations become visible on the next call. `key` and
/// `value` report the entry as of the last positioning call.
#[derive(Debug)]
pub struct OmapIterator {
    object: ObjectRef,
    current: Option<(String, Bytes)>,
}

impl OmapIterator {
    /// Create an iterator positioned at the first key.
    pub fn new(object: ObjectRef) -> Self {
        let mut it = Self {
            object,
            current: None,
        };
        it.seek_to_first();
        it
    }

    pub fn seek_to_first(&mut self) -> i32 {
        self.current = self.object.omap_seek(Bound::Unbounded);
        0
    }

    /// Position at the first key `>= key`.
    pub fn seek_lower_bound(&mut self, key: &str) -> i32 {
        self.current = self.object.omap_seek(Bound::Included(key));
        0
    }

    /// Position at the first key `> key`.
    pub fn seek_upper_bound(&mut self, key: &str) -> i32 {
        self.current = self.object.omap_seek(Bound::Excluded(key));
        0
    }

    /// Step to the key after the current one. Past the end this is a no-op.
    pub fn advance(&mut self) -> i32 {
        if let Some((key, _)) = self.current.take() {
            self.current = self.object.omap_seek(Bound::Excluded(key.as_str()));
        }
        0
    }

    pub fn valid(&self) -> bool {
        self.current.is_some()
    }

    /// Current key, or `""` when not valid.
    pub fn key(&self) -> &str {
        self.current.as_ref().map_or("", |(k, _)| k.as_str())
    }

    /// Current value, or an empty buffer when not valid.
    pub fn value(&self) -> Bytes {
        self.current
            .as_ref()
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }

    /// Always `0`; the in-memory omap cannot fail mid-iteration.
    pub fn status(&self) -> i32 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Object;
    use memstore_payload::PayloadKind;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Arc;

    fn object_with(keys: &[&str]) -> ObjectRef {
        let obj = Arc::new(Object::new(PayloadKind::Buffer, 0));
        let entries: BTreeMap<String, Bytes> = keys
            .iter()
            .map(|k| (k.to_string(), Bytes::from(format!("v{k}"))))
            .collect();
        obj.omap_set_keys(&entries);
        obj
    }

    #[test]
    fn walks_in_key_order() {
        let mut it = OmapIterator::new(object_with(&["b", "a", "c"]));
        let mut seen = Vec::new();
        while it.valid() {
            seen.push(it.key().to_string());
            it.advance();
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert_eq!(it.status(), 0);
        assert_eq!(it.key(), "");
    }

    #[test]
    fn lower_bound_finds_next_present_key() {
        let mut it = OmapIterator::new(object_with(&["a", "c"]));
        it.seek_lower_bound("b");
        assert!(it.valid());
        assert_eq!(it.key(), "c");
        assert_eq!(&it.value()[..], b"vc");
        it.seek_lower_bound("c");
        assert_eq!(it.key(), "c");
    }

    #[test]
    fn upper_bound_skips_equal_key() {
        let mut it = OmapIterator::new(object_with(&["a", "c"]));
        it.seek_upper_bound("a");
        assert_eq!(it.key(), "c");
        it.seek_upper_bound("c");
        assert!(!it.valid());
        assert!(it.value().is_empty());
    }

    #[test]
    fn empty_omap_is_never_valid() {
        let mut it = OmapIterator::new(object_with(&[]));
        assert!(!it.valid());
        it.advance();
        assert!(!it.valid());
    }

    #[test]
    fn sees_mutations_between_calls() {
        let obj = object_with(&["a", "b", "d"]);
        let mut it = OmapIterator::new(Arc::clone(&obj));
        assert_eq!(it.key(), "a");

        let gone: BTreeSet<String> = ["b".to_string()].into_iter().collect();
        obj.omap_rm_keys(&gone);
        obj.omap_set_keys(&[("c".to_string(), Bytes::new())].into_iter().collect());

        it.advance();
        assert_eq!(it.key(), "c");
        it.advance();
        assert_eq!(it.key(), "d");
    }
}
