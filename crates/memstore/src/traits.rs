use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use memstore_types::{CollectionId, ObjectId};

use crate::engine::TransactionReport;
use crate::error::StoreResult;
use crate::object::Omap;
use crate::omap_iter::OmapIterator;
use crate::sequencer::Sequencer;
use crate::transaction::Transaction;

/// `stat` result for one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectStat {
    pub size: u64,
    pub blksize: u64,
    /// `size` in `blksize` units, rounded up.
    pub blocks: u64,
    pub nlink: u32,
}

/// Object store backend interface.
///
/// Reads go straight to the current state. Mutations are submitted as
/// [`Transaction`] batches through a [`Sequencer`]; batches on one sequencer
/// apply in submission order.
///
/// Implementations assume callers never run two operations on the same
/// object concurrently.
pub trait ObjectStore: Send + Sync {
    /// Apply one batch and schedule its completion callbacks.
    fn queue_transaction(&self, seq: &Sequencer, tx: Transaction)
        -> StoreResult<TransactionReport>;

    /// Apply several batches in order on one sequencer.
    ///
    /// Default implementation calls `queue_transaction()` for each batch.
    fn queue_transactions(
        &self,
        seq: &Sequencer,
        txs: Vec<Transaction>,
    ) -> StoreResult<Vec<TransactionReport>> {
        txs.into_iter()
            .map(|tx| self.queue_transaction(seq, tx))
            .collect()
    }

    // -- objects --

    fn exists(&self, cid: &CollectionId, oid: &ObjectId) -> bool;

    fn stat(&self, cid: &CollectionId, oid: &ObjectId) -> StoreResult<ObjectStat>;

    /// Read `len` bytes at `offset`, zero-filled past the end. A `len` of
    /// zero reads from `offset` to the end of the object.
    fn read(&self, cid: &CollectionId, oid: &ObjectId, offset: u64, len: u64)
        -> StoreResult<Bytes>;

    /// Allocated extents of `[offset, offset + len)` as `offset -> length`.
    fn fiemap(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        offset: u64,
        len: u64,
    ) -> StoreResult<BTreeMap<u64, u64>>;

    fn getattr(&self, cid: &CollectionId, oid: &ObjectId, name: &str) -> StoreResult<Bytes>;

    fn getattrs(&self, cid: &CollectionId, oid: &ObjectId) -> StoreResult<BTreeMap<String, Bytes>>;

    // -- collections --

    /// Every collection id, sorted.
    fn list_collections(&self) -> Vec<CollectionId>;

    fn collection_exists(&self, cid: &CollectionId) -> bool;

    fn collection_empty(&self, cid: &CollectionId) -> StoreResult<bool>;

    fn collection_getattr(&self, cid: &CollectionId, name: &str) -> StoreResult<Bytes>;

    fn collection_getattrs(&self, cid: &CollectionId) -> StoreResult<BTreeMap<String, Bytes>>;

    /// Up to `max` ids in `[start, end)` in hash-bitwise order, plus the id
    /// to resume from ([`ObjectId::max`] once exhausted).
    fn collection_list(
        &self,
        cid: &CollectionId,
        start: &ObjectId,
        end: &ObjectId,
        max: usize,
    ) -> StoreResult<(Vec<ObjectId>, ObjectId)>;

    // -- omap --

    fn omap_get(&self, cid: &CollectionId, oid: &ObjectId) -> StoreResult<Omap>;

    fn omap_get_header(&self, cid: &CollectionId, oid: &ObjectId) -> StoreResult<Bytes>;

    fn omap_get_keys(&self, cid: &CollectionId, oid: &ObjectId) -> StoreResult<BTreeSet<String>>;

    fn omap_get_values(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        keys: &BTreeSet<String>,
    ) -> StoreResult<BTreeMap<String, Bytes>>;

    /// The subset of `keys` present in the omap.
    fn omap_check_keys(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        keys: &BTreeSet<String>,
    ) -> StoreResult<BTreeSet<String>>;

    /// `None` when the collection or object does not exist.
    fn get_omap_iterator(&self, cid: &CollectionId, oid: &ObjectId) -> Option<OmapIterator>;
}
