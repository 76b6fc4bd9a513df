use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use bytes::Bytes;
use memstore_types::{CollectionId, ObjectId};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::MemStoreConfig;
use crate::engine::{Engine, EngineLimits, TransactionReport};
use crate::error::{StoreError, StoreResult};
use crate::finisher::{run_callbacks, Finisher};
use crate::object::{ObjectRef, Omap};
use crate::omap_iter::OmapIterator;
use crate::registry::Registry;
use crate::sequencer::Sequencer;
use crate::snapshot;
use crate::traits::{ObjectStat, ObjectStore};
use crate::transaction::Transaction;

/// Block size reported by `stat`.
const STAT_BLKSIZE: u64 = 4096;

/// In-memory object store.
///
/// Holds every collection in a [`Registry`], applies transaction batches
/// through a single-batch-at-a-time [`Engine`], and delivers asynchronous
/// completions on a [`Finisher`] thread. State survives only through
/// explicit [`save`](Self::save) and [`load`](Self::load).
pub struct MemStore {
    config: MemStoreConfig,
    registry: Registry,
    engine: Engine,
    finisher: Finisher,
    default_sequencer: Sequencer,
    fsid: RwLock<Uuid>,
    stopped: AtomicBool,
}

impl MemStore {
    /// Create an empty store with a random fsid.
    pub fn new(config: MemStoreConfig) -> StoreResult<Self> {
        config.validate()?;
        let engine = Engine::new(EngineLimits {
            use_page_set: config.use_page_set,
            page_size: config.page_size,
            max_object_name_len: config.max_object_name_len,
            max_attr_name_len: config.max_attr_name_len,
            max_object_size: config.max_object_size,
        });
        let finisher = Finisher::start("memstore-finisher")?;
        let fsid = Uuid::new_v4();
        info!(
            %fsid,
            page_size = config.page_size,
            use_page_set = config.use_page_set,
            "memstore created"
        );
        Ok(Self {
            config,
            registry: Registry::new(),
            engine,
            finisher,
            default_sequencer: Sequencer::new("default"),
            fsid: RwLock::new(fsid),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &MemStoreConfig {
        &self.config
    }

    pub fn fsid(&self) -> Uuid {
        *self.fsid.read().expect("fsid lock poisoned")
    }

    pub fn set_fsid(&self, fsid: Uuid) {
        *self.fsid.write().expect("fsid lock poisoned") = fsid;
    }

    /// Total bytes across all objects.
    pub fn used_bytes(&self) -> u64 {
        self.registry.used_bytes()
    }

    pub fn max_object_name_len(&self) -> usize {
        self.config.max_object_name_len
    }

    pub fn max_attr_name_len(&self) -> usize {
        self.config.max_attr_name_len
    }

    /// Apply a batch on the store's default sequencer.
    pub fn apply_transaction(&self, tx: Transaction) -> StoreResult<TransactionReport> {
        self.queue_transaction(&self.default_sequencer, tx)
    }

    /// Stop accepting batches and drain pending completions. Idempotent.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.finisher.stop();
            info!(fsid = %self.fsid(), "memstore stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    // -- snapshots --

    /// Encode the whole store.
    pub fn save_to_bytes(&self) -> Bytes {
        let _guard = self.engine.exclusive();
        snapshot::encode(&self.fsid(), &self.registry)
    }

    /// Replace the whole store with a decoded snapshot.
    ///
    /// Nothing changes unless the entire blob decodes.
    pub fn load_from_bytes(&self, blob: &[u8]) -> StoreResult<()> {
        let (fsid, registry) = snapshot::decode(blob)?;
        let _guard = self.engine.exclusive();
        let collections = registry.len();
        let used = registry.used_bytes();
        self.registry.replace_with(registry);
        self.set_fsid(fsid);
        info!(%fsid, collections, used_bytes = used, "snapshot loaded");
        Ok(())
    }

    /// Write a framed snapshot to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> StoreResult<()> {
        let path = path.as_ref();
        let blob = self.save_to_bytes();
        snapshot::write_file(path, &blob)?;
        info!(
            path = %path.display(),
            bytes = blob.len(),
            collections = self.registry.len(),
            "snapshot saved"
        );
        Ok(())
    }

    /// Load a framed snapshot written by [`save`](Self::save).
    pub fn load(&self, path: impl AsRef<Path>) -> StoreResult<()> {
        let blob = snapshot::read_file(path.as_ref())?;
        self.load_from_bytes(&blob)
    }

    fn object(&self, cid: &CollectionId, oid: &ObjectId) -> StoreResult<ObjectRef> {
        self.registry
            .require(cid)?
            .get(oid)
            .ok_or_else(|| StoreError::ObjectNotFound {
                cid: cid.clone(),
                oid: oid.clone(),
            })
    }
}

impl ObjectStore for MemStore {
    fn queue_transaction(
        &self,
        seq: &Sequencer,
        tx: Transaction,
    ) -> StoreResult<TransactionReport> {
        if self.is_stopped() {
            return Err(StoreError::ShutDown);
        }
        let mut applied = seq.enter();
        let (ops, callbacks) = tx.into_parts();
        let report = self.engine.apply(&self.registry, &ops);
        *applied += 1;

        let status = report.status();
        debug!(
            sequencer = seq.name(),
            ops = ops.len(),
            status,
            "transaction applied"
        );
        run_callbacks(callbacks.on_applied_sync, status, seq.name());
        // The batch is applied either way; a closed queue only loses callbacks.
        for stage in [callbacks.on_applied, callbacks.on_commit] {
            if let Err(error) = self.finisher.queue(stage, status) {
                warn!(sequencer = seq.name(), status, %error, "completion callbacks dropped");
            }
        }
        Ok(report)
    }

    fn exists(&self, cid: &CollectionId, oid: &ObjectId) -> bool {
        self.object(cid, oid).is_ok()
    }

    fn stat(&self, cid: &CollectionId, oid: &ObjectId) -> StoreResult<ObjectStat> {
        let size = self.object(cid, oid)?.size();
        Ok(ObjectStat {
            size,
            blksize: STAT_BLKSIZE,
            blocks: size.div_ceil(STAT_BLKSIZE),
            nlink: 1,
        })
    }

    fn read(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        offset: u64,
        len: u64,
    ) -> StoreResult<Bytes> {
        let obj = self.object(cid, oid)?;
        let len = if len == 0 {
            obj.size().saturating_sub(offset)
        } else {
            len
        };
        if len > self.config.max_object_size {
            return Err(StoreError::InvalidArgument(format!(
                "read length {len} exceeds max object size {}",
                self.config.max_object_size
            )));
        }
        let len = usize::try_from(len)
            .map_err(|_| StoreError::InvalidArgument(format!("read length {len}")))?;
        Ok(obj.payload().read(offset, len))
    }

    fn fiemap(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        offset: u64,
        len: u64,
    ) -> StoreResult<BTreeMap<u64, u64>> {
        let size = self.object(cid, oid)?.size();
        let mut extents = BTreeMap::new();
        if offset < size {
            let avail = size - offset;
            let len = if len == 0 { avail } else { len.min(avail) };
            extents.insert(offset, len);
        }
        Ok(extents)
    }

    fn getattr(&self, cid: &CollectionId, oid: &ObjectId, name: &str) -> StoreResult<Bytes> {
        self.object(cid, oid)?
            .getattr(name)
            .ok_or_else(|| StoreError::AttributeNotFound(name.to_string()))
    }

    fn getattrs(&self, cid: &CollectionId, oid: &ObjectId) -> StoreResult<BTreeMap<String, Bytes>> {
        Ok(self.object(cid, oid)?.getattrs())
    }

    fn list_collections(&self) -> Vec<CollectionId> {
        self.registry.list()
    }

    fn collection_exists(&self, cid: &CollectionId) -> bool {
        self.registry.contains(cid)
    }

    fn collection_empty(&self, cid: &CollectionId) -> StoreResult<bool> {
        Ok(self.registry.require(cid)?.is_empty())
    }

    fn collection_getattr(&self, cid: &CollectionId, name: &str) -> StoreResult<Bytes> {
        self.registry
            .require(cid)?
            .getattr(name)
            .ok_or_else(|| StoreError::AttributeNotFound(name.to_string()))
    }

    fn collection_getattrs(&self, cid: &CollectionId) -> StoreResult<BTreeMap<String, Bytes>> {
        Ok(self.registry.require(cid)?.getattrs())
    }

    /// A `min` end bound (the default id) means "no upper bound".
    fn collection_list(
        &self,
        cid: &CollectionId,
        start: &ObjectId,
        end: &ObjectId,
        max: usize,
    ) -> StoreResult<(Vec<ObjectId>, ObjectId)> {
        let coll = self.registry.require(cid)?;
        let unbounded = ObjectId::max();
        let end = if end.is_min() { &unbounded } else { end };
        Ok(coll.list(start, end, max))
    }

    fn omap_get(&self, cid: &CollectionId, oid: &ObjectId) -> StoreResult<Omap> {
        Ok(self.object(cid, oid)?.omap())
    }

    fn omap_get_header(&self, cid: &CollectionId, oid: &ObjectId) -> StoreResult<Bytes> {
        Ok(self.object(cid, oid)?.omap_header())
    }

    fn omap_get_keys(&self, cid: &CollectionId, oid: &ObjectId) -> StoreResult<BTreeSet<String>> {
        Ok(self.object(cid, oid)?.omap_keys())
    }

    fn omap_get_values(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        keys: &BTreeSet<String>,
    ) -> StoreResult<BTreeMap<String, Bytes>> {
        Ok(self.object(cid, oid)?.omap_values(keys))
    }

    fn omap_check_keys(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        keys: &BTreeSet<String>,
    ) -> StoreResult<BTreeSet<String>> {
        Ok(self.object(cid, oid)?.omap_check_keys(keys))
    }

    fn get_omap_iterator(&self, cid: &CollectionId, oid: &ObjectId) -> Option<OmapIterator> {
        self.object(cid, oid).ok().map(OmapIterator::new)
    }
}

impl Drop for MemStore {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for MemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemStore")
            .field("fsid", &self.fsid())
            .field("collections", &self.registry.len())
            .field("used_bytes", &self.used_bytes())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
