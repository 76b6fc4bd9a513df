use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use memstore_types::{CollectionId, ObjectId};
use tokio::sync::oneshot;

/// Completion callback. Receives the batch status: `0`, or the negative
/// errno of the first failed operation.
pub type Callback = Box<dyn FnOnce(i32) + Send + 'static>;

/// One primitive mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Nop,
    Touch {
        cid: CollectionId,
        oid: ObjectId,
    },
    Write {
        cid: CollectionId,
        oid: ObjectId,
        offset: u64,
        data: Bytes,
    },
    Zero {
        cid: CollectionId,
        oid: ObjectId,
        offset: u64,
        len: u64,
    },
    Truncate {
        cid: CollectionId,
        oid: ObjectId,
        size: u64,
    },
    Remove {
        cid: CollectionId,
        oid: ObjectId,
    },
    SetAttrs {
        cid: CollectionId,
        oid: ObjectId,
        attrs: BTreeMap<String, Bytes>,
    },
    RmAttr {
        cid: CollectionId,
        oid: ObjectId,
        name: String,
    },
    RmAttrs {
        cid: CollectionId,
        oid: ObjectId,
    },
    Clone {
        cid: CollectionId,
        src: ObjectId,
        dst: ObjectId,
    },
    CloneRange {
        cid: CollectionId,
        src: ObjectId,
        dst: ObjectId,
        src_offset: u64,
        len: u64,
        dst_offset: u64,
    },
    OmapClear {
        cid: CollectionId,
        oid: ObjectId,
    },
    OmapSetKeys {
        cid: CollectionId,
        oid: ObjectId,
        entries: BTreeMap<String, Bytes>,
    },
    OmapRmKeys {
        cid: CollectionId,
        oid: ObjectId,
        keys: BTreeSet<String>,
    },
    /// Remove keys in `[first, last)`.
    OmapRmKeyRange {
        cid: CollectionId,
        oid: ObjectId,
        first: String,
        last: String,
    },
    OmapSetHeader {
        cid: CollectionId,
        oid: ObjectId,
        header: Bytes,
    },
    CreateCollection {
        cid: CollectionId,
    },
    DestroyCollection {
        cid: CollectionId,
    },
    /// Expected object count for a collection. Accepted and ignored.
    CollectionHint {
        cid: CollectionId,
        expected_objects: u64,
    },
    CollectionSetAttr {
        cid: CollectionId,
        name: String,
        value: Bytes,
    },
    CollectionRmAttr {
        cid: CollectionId,
        name: String,
    },
    /// Link `oid` from `src` into `dst` as well.
    CollectionAdd {
        dst: CollectionId,
        src: CollectionId,
        oid: ObjectId,
    },
    CollectionMoveRename {
        src_cid: CollectionId,
        src_oid: ObjectId,
        dst_cid: CollectionId,
        dst_oid: ObjectId,
    },
    SplitCollection {
        cid: CollectionId,
        bits: u32,
        rem: u32,
        dest: CollectionId,
    },
}

impl Op {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Op::Nop => "nop",
            Op::Touch { .. } => "touch",
            Op::Write { .. } => "write",
            Op::Zero { .. } => "zero",
            Op::Truncate { .. } => "truncate",
            Op::Remove { .. } => "remove",
            Op::SetAttrs { .. } => "setattrs",
            Op::RmAttr { .. } => "rmattr",
            Op::RmAttrs { .. } => "rmattrs",
            Op::Clone { .. } => "clone",
            Op::CloneRange { .. } => "clone_range",
            Op::OmapClear { .. } => "omap_clear",
            Op::OmapSetKeys { .. } => "omap_setkeys",
            Op::OmapRmKeys { .. } => "omap_rmkeys",
            Op::OmapRmKeyRange { .. } => "omap_rmkeyrange",
            Op::OmapSetHeader { .. } => "omap_setheader",
            Op::CreateCollection { .. } => "create_collection",
            Op::DestroyCollection { .. } => "destroy_collection",
            Op::CollectionHint { .. } => "collection_hint",
            Op::CollectionSetAttr { .. } => "collection_setattr",
            Op::CollectionRmAttr { .. } => "collection_rmattr",
            Op::CollectionAdd { .. } => "collection_add",
            Op::CollectionMoveRename { .. } => "collection_move_rename",
            Op::SplitCollection { .. } => "split_collection",
        }
    }
}

/// An ordered batch of operations plus its completion callbacks.
///
/// Build one with the chaining helpers, then hand it to
/// [`ObjectStore::queue_transaction`](crate::ObjectStore::queue_transaction).
///
/// ```
/// use memstore::Transaction;
/// use memstore_types::{CollectionId, ObjectId};
///
/// let cid = CollectionId::new("1.0_head").unwrap();
/// let oid = ObjectId::new(1, "", "obj");
/// let mut tx = Transaction::new();
/// tx.create_collection(&cid)
///     .touch(&cid, &oid)
///     .write(&cid, &oid, 0, &b"hello"[..]);
/// assert_eq!(tx.len(), 3);
/// ```
#[derive(Default)]
pub struct Transaction {
    ops: Vec<Op>,
    on_applied_sync: Vec<Callback>,
    on_applied: Vec<Callback>,
    on_commit: Vec<Callback>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Append a raw operation.
    pub fn push(&mut self, op: Op) -> &mut Self {
        self.ops.push(op);
        self
    }

    /// Move every operation and callback of `other` to the end of `self`.
    pub fn append(&mut self, mut other: Transaction) -> &mut Self {
        self.ops.append(&mut other.ops);
        self.on_applied_sync.append(&mut other.on_applied_sync);
        self.on_applied.append(&mut other.on_applied);
        self.on_commit.append(&mut other.on_commit);
        self
    }

    // -- callbacks --

    /// Run on the submitting thread as soon as the batch has been applied.
    pub fn on_applied_sync(&mut self, cb: impl FnOnce(i32) + Send + 'static) -> &mut Self {
        self.on_applied_sync.push(Box::new(cb));
        self
    }

    /// Run on the finisher thread after the batch has been applied.
    pub fn on_applied(&mut self, cb: impl FnOnce(i32) + Send + 'static) -> &mut Self {
        self.on_applied.push(Box::new(cb));
        self
    }

    /// Run on the finisher thread after the `on_applied` callbacks.
    pub fn on_commit(&mut self, cb: impl FnOnce(i32) + Send + 'static) -> &mut Self {
        self.on_commit.push(Box::new(cb));
        self
    }

    /// Receiver resolved with the batch status once it has been applied.
    pub fn applied_notifier(&mut self) -> oneshot::Receiver<i32> {
        let (tx, rx) = oneshot::channel();
        self.on_applied(move |status| {
            // The waiter may have gone away.
            let _ = tx.send(status);
        });
        rx
    }

    pub(crate) fn into_parts(self) -> (Vec<Op>, TransactionCallbacks) {
        (
            self.ops,
            TransactionCallbacks {
                on_applied_sync: self.on_applied_sync,
                on_applied: self.on_applied,
                on_commit: self.on_commit,
            },
        )
    }

    // -- object operations --

    pub fn nop(&mut self) -> &mut Self {
        self.push(Op::Nop)
    }

    pub fn touch(&mut self, cid: &CollectionId, oid: &ObjectId) -> &mut Self {
        self.push(Op::Touch {
            cid: cid.clone(),
            oid: oid.clone(),
        })
    }

    pub fn write(
        &mut self,
        cid: &CollectionId,
        oid: &ObjectId,
        offset: u64,
        data: impl Into<Bytes>,
    ) -> &mut Self {
        self.push(Op::Write {
            cid: cid.clone(),
            oid: oid.clone(),
            offset,
            data: data.into(),
        })
    }

    pub fn zero(&mut self, cid: &CollectionId, oid: &ObjectId, offset: u64, len: u64) -> &mut Self {
        self.push(Op::Zero {
            cid: cid.clone(),
            oid: oid.clone(),
            offset,
            len,
        })
    }

    pub fn truncate(&mut self, cid: &CollectionId, oid: &ObjectId, size: u64) -> &mut Self {
        self.push(Op::Truncate {
            cid: cid.clone(),
            oid: oid.clone(),
            size,
        })
    }

    pub fn remove(&mut self, cid: &CollectionId, oid: &ObjectId) -> &mut Self {
        self.push(Op::Remove {
            cid: cid.clone(),
            oid: oid.clone(),
        })
    }

    pub fn setattr(
        &mut self,
        cid: &CollectionId,
        oid: &ObjectId,
        name: &str,
        value: impl Into<Bytes>,
    ) -> &mut Self {
        let mut attrs = BTreeMap::new();
        attrs.insert(name.to_string(), value.into());
        self.setattrs(cid, oid, attrs)
    }

    pub fn setattrs(
        &mut self,
        cid: &CollectionId,
        oid: &ObjectId,
        attrs: BTreeMap<String, Bytes>,
    ) -> &mut Self {
        self.push(Op::SetAttrs {
            cid: cid.clone(),
            oid: oid.clone(),
            attrs,
        })
    }

    pub fn rmattr(&mut self, cid: &CollectionId, oid: &ObjectId, name: &str) -> &mut Self {
        self.push(Op::RmAttr {
            cid: cid.clone(),
            oid: oid.clone(),
            name: name.to_string(),
        })
    }

    pub fn rmattrs(&mut self, cid: &CollectionId, oid: &ObjectId) -> &mut Self {
        self.push(Op::RmAttrs {
            cid: cid.clone(),
            oid: oid.clone(),
        })
    }

    pub fn clone_object(&mut self, cid: &CollectionId, src: &ObjectId, dst: &ObjectId) -> &mut Self {
        self.push(Op::Clone {
            cid: cid.clone(),
            src: src.clone(),
            dst: dst.clone(),
        })
    }

    pub fn clone_range(
        &mut self,
        cid: &CollectionId,
        src: &ObjectId,
        dst: &ObjectId,
        src_offset: u64,
        len: u64,
        dst_offset: u64,
    ) -> &mut Self {
        self.push(Op::CloneRange {
            cid: cid.clone(),
            src: src.clone(),
            dst: dst.clone(),
            src_offset,
            len,
            dst_offset,
        })
    }

    // -- omap operations --

    pub fn omap_clear(&mut self, cid: &CollectionId, oid: &ObjectId) -> &mut Self {
        self.push(Op::OmapClear {
            cid: cid.clone(),
            oid: oid.clone(),
        })
    }

    pub fn omap_setkeys(
        &mut self,
        cid: &CollectionId,
        oid: &ObjectId,
        entries: BTreeMap<String, Bytes>,
    ) -> &mut Self {
        self.push(Op::OmapSetKeys {
            cid: cid.clone(),
            oid: oid.clone(),
            entries,
        })
    }

    pub fn omap_rmkeys(
        &mut self,
        cid: &CollectionId,
        oid: &ObjectId,
        keys: BTreeSet<String>,
    ) -> &mut Self {
        self.push(Op::OmapRmKeys {
            cid: cid.clone(),
            oid: oid.clone(),
            keys,
        })
    }

    pub fn omap_rmkeyrange(
        &mut self,
        cid: &CollectionId,
        oid: &ObjectId,
        first: &str,
        last: &str,
    ) -> &mut Self {
        self.push(Op::OmapRmKeyRange {
            cid: cid.clone(),
            oid: oid.clone(),
            first: first.to_string(),
            last: last.to_string(),
        })
    }

    pub fn omap_setheader(
        &mut self,
        cid: &CollectionId,
        oid: &ObjectId,
        header: impl Into<Bytes>,
    ) -> &mut Self {
        self.push(Op::OmapSetHeader {
            cid: cid.clone(),
            oid: oid.clone(),
            header: header.into(),
        })
    }

    // -- collection operations --

    pub fn create_collection(&mut self, cid: &CollectionId) -> &mut Self {
        self.push(Op::CreateCollection { cid: cid.clone() })
    }

    pub fn destroy_collection(&mut self, cid: &CollectionId) -> &mut Self {
        self.push(Op::DestroyCollection { cid: cid.clone() })
    }

    pub fn collection_hint(&mut self, cid: &CollectionId, expected_objects: u64) -> &mut Self {
        self.push(Op::CollectionHint {
            cid: cid.clone(),
            expected_objects,
        })
    }

    pub fn collection_setattr(
        &mut self,
        cid: &CollectionId,
        name: &str,
        value: impl Into<Bytes>,
    ) -> &mut Self {
        self.push(Op::CollectionSetAttr {
            cid: cid.clone(),
            name: name.to_string(),
            value: value.into(),
        })
    }

    pub fn collection_rmattr(&mut self, cid: &CollectionId, name: &str) -> &mut Self {
        self.push(Op::CollectionRmAttr {
            cid: cid.clone(),
            name: name.to_string(),
        })
    }

    pub fn collection_add(
        &mut self,
        dst: &CollectionId,
        src: &CollectionId,
        oid: &ObjectId,
    ) -> &mut Self {
        self.push(Op::CollectionAdd {
            dst: dst.clone(),
            src: src.clone(),
            oid: oid.clone(),
        })
    }

    pub fn collection_move_rename(
        &mut self,
        src_cid: &CollectionId,
        src_oid: &ObjectId,
        dst_cid: &CollectionId,
        dst_oid: &ObjectId,
    ) -> &mut Self {
        self.push(Op::CollectionMoveRename {
            src_cid: src_cid.clone(),
            src_oid: src_oid.clone(),
            dst_cid: dst_cid.clone(),
            dst_oid: dst_oid.clone(),
        })
    }

    pub fn split_collection(
        &mut self,
        cid: &CollectionId,
        bits: u32,
        rem: u32,
        dest: &CollectionId,
    ) -> &mut Self {
        self.push(Op::SplitCollection {
            cid: cid.clone(),
            bits,
            rem,
            dest: dest.clone(),
        })
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("ops", &self.ops)
            .field("on_applied_sync", &self.on_applied_sync.len())
            .field("on_applied", &self.on_applied.len())
            .field("on_commit", &self.on_commit.len())
            .finish()
    }
}

/// Callbacks detached from their transaction for delivery.
#[derive(Default)]
pub(crate) struct TransactionCallbacks {
    pub on_applied_sync: Vec<Callback>,
    pub on_applied: Vec<Callback>,
    pub on_commit: Vec<Callback>,
}
