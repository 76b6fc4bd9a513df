use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use memstore_types::{CollectionId, ObjectId};
use tracing::{debug, info, warn};

use crate::collection::CollectionRef;
use crate::error::{StoreError, StoreResult};
use crate::object::ObjectRef;
use crate::registry::Registry;
use crate::transaction::Op;

/// Whether a batch is being applied. Guarded by the apply lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Applying,
}

/// Settings the engine needs from the store configuration.
#[derive(Debug, Clone, Copy)]
pub struct EngineLimits {
    pub use_page_set: bool,
    pub page_size: u64,
    pub max_object_name_len: usize,
    pub max_attr_name_len: usize,
    pub max_object_size: u64,
}

/// A failed operation within a batch.
#[derive(Debug)]
pub struct OpFailure {
    /// Position of the operation in its batch.
    pub index: usize,
    pub op: &'static str,
    pub error: StoreError,
}

/// Outcome of applying one batch.
///
/// Every operation is attempted; a failure does not undo the operations
/// before it or stop the ones after it.
#[derive(Debug, Default)]
pub struct TransactionReport {
    /// Number of operations that succeeded.
    pub applied: usize,
    pub failures: Vec<OpFailure>,
}

impl TransactionReport {
    /// `0`, or the negative errno of the first failure.
    pub fn status(&self) -> i32 {
        self.failures.first().map_or(0, |f| f.error.errno())
    }

    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Applies operation batches against a registry, one batch at a time.
#[derive(Debug)]
pub struct Engine {
    apply_lock: Mutex<EngineState>,
    limits: EngineLimits,
}

impl Engine {
    pub fn new(limits: EngineLimits) -> Self {
        Self {
            apply_lock: Mutex::new(EngineState::Idle),
            limits,
        }
    }

    pub fn limits(&self) -> &EngineLimits {
        &self.limits
    }

    /// Reject a byte range that overflows or ends past `max_object_size`.
    pub fn check_extent(&self, offset: u64, len: u64) -> StoreResult<()> {
        let end = offset.checked_add(len).ok_or_else(|| {
            StoreError::InvalidArgument(format!("range {offset}+{len} overflows"))
        })?;
        if end > self.limits.max_object_size {
            return Err(StoreError::InvalidArgument(format!(
                "range {offset}+{len} exceeds max object size {}",
                self.limits.max_object_size
            )));
        }
        Ok(())
    }

    /// Take the apply lock without applying anything, to keep batches out
    /// while the whole registry is read or replaced.
    pub fn exclusive(&self) -> MutexGuard<'_, EngineState> {
        self.apply_lock.lock().expect("apply lock poisoned")
    }

    /// Apply `ops` in order under the apply lock.
    pub fn apply(&self, registry: &Registry, ops: &[Op]) -> TransactionReport {
        let mut state = self.exclusive();
        *state = EngineState::Applying;
        let mut report = TransactionReport::default();
        for (index, op) in ops.iter().enumerate() {
            match self.apply_op(registry, op) {
                Ok(()) => report.applied += 1,
                Err(error) => {
                    warn!(
                        index,
                        op = op.name(),
                        errno = error.errno(),
                        %error,
                        "transaction operation failed"
                    );
                    report.failures.push(OpFailure {
                        index,
                        op: op.name(),
                        error,
                    });
                }
            }
        }
        *state = EngineState::Idle;
        report
    }

    fn apply_op(&self, reg: &Registry, op: &Op) -> StoreResult<()> {
        match op {
            Op::Nop => Ok(()),
            Op::Touch { cid, oid } => self.touch(reg, cid, oid),
            Op::Write {
                cid,
                oid,
                offset,
                data,
            } => self.write(reg, cid, oid, *offset, data),
            Op::Zero {
                cid,
                oid,
                offset,
                len,
            } => self.zero(reg, cid, oid, *offset, *len),
            Op::Truncate { cid, oid, size } => self.truncate(reg, cid, oid, *size),
            Op::Remove { cid, oid } => self.remove(reg, cid, oid),
            Op::SetAttrs { cid, oid, attrs } => {
                for name in attrs.keys() {
                    self.check_attr_name(name)?;
                }
                existing(reg, cid, oid)?.setattrs(attrs);
                Ok(())
            }
            Op::RmAttr { cid, oid, name } => {
                if existing(reg, cid, oid)?.rmattr(name) {
                    Ok(())
                } else {
                    Err(StoreError::AttributeNotFound(name.clone()))
                }
            }
            Op::RmAttrs { cid, oid } => {
                existing(reg, cid, oid)?.rmattrs();
                Ok(())
            }
            Op::Clone { cid, src, dst } => self.clone_object(reg, cid, src, dst),
            Op::CloneRange {
                cid,
                src,
                dst,
                src_offset,
                len,
                dst_offset,
            } => self.clone_range(reg, cid, src, dst, *src_offset, *len, *dst_offset),
            Op::OmapClear { cid, oid } => {
                existing(reg, cid, oid)?.omap_clear();
                Ok(())
            }
            Op::OmapSetKeys { cid, oid, entries } => {
                existing(reg, cid, oid)?.omap_set_keys(entries);
                Ok(())
            }
            Op::OmapRmKeys { cid, oid, keys } => {
                existing(reg, cid, oid)?.omap_rm_keys(keys);
                Ok(())
            }
            Op::OmapRmKeyRange {
                cid,
                oid,
                first,
                last,
            } => {
                existing(reg, cid, oid)?.omap_rm_range(first, last);
                Ok(())
            }
            Op::OmapSetHeader { cid, oid, header } => {
                existing(reg, cid, oid)?.omap_set_header(header.clone());
                Ok(())
            }
            Op::CreateCollection { cid } => {
                reg.create(cid, self.limits.use_page_set, self.limits.page_size)?;
                info!(%cid, paged = self.limits.use_page_set, "collection created");
                Ok(())
            }
            Op::DestroyCollection { cid } => self.destroy_collection(reg, cid),
            Op::CollectionHint {
                cid,
                expected_objects,
            } => {
                debug!(%cid, expected_objects, "collection hint ignored");
                Ok(())
            }
            Op::CollectionSetAttr { cid, name, value } => {
                self.check_attr_name(name)?;
                reg.require(cid)?.setattr(name, value.clone());
                Ok(())
            }
            Op::CollectionRmAttr { cid, name } => {
                if reg.require(cid)?.rmattr(name) {
                    Ok(())
                } else {
                    Err(StoreError::AttributeNotFound(name.clone()))
                }
            }
            Op::CollectionAdd { dst, src, oid } => self.collection_add(reg, dst, src, oid),
            Op::CollectionMoveRename {
                src_cid,
                src_oid,
                dst_cid,
                dst_oid,
            } => self.move_rename(reg, src_cid, src_oid, dst_cid, dst_oid),
            Op::SplitCollection {
                cid,
                bits,
                rem,
                dest,
            } => self.split_collection(reg, cid, *bits, *rem, dest),
        }
    }

    fn check_object_name(&self, oid: &ObjectId) -> StoreResult<()> {
        let len = oid.name.len();
        if len > self.limits.max_object_name_len {
            return Err(StoreError::NameTooLong {
                what: "object",
                len,
                max: self.limits.max_object_name_len,
            });
        }
        Ok(())
    }

    fn check_attr_name(&self, name: &str) -> StoreResult<()> {
        if name.len() > self.limits.max_attr_name_len {
            return Err(StoreError::NameTooLong {
                what: "attribute",
                len: name.len(),
                max: self.limits.max_attr_name_len,
            });
        }
        Ok(())
    }

    /// Fetch or create the object, for operations that create their target.
    fn create_target(
        &self,
        reg: &Registry,
        cid: &CollectionId,
        oid: &ObjectId,
    ) -> StoreResult<ObjectRef> {
        let coll = reg.require(cid)?;
        if let Some(obj) = coll.get(oid) {
            return Ok(obj);
        }
        self.check_object_name(oid)?;
        Ok(coll.get_or_create(oid))
    }

    fn touch(&self, reg: &Registry, cid: &CollectionId, oid: &ObjectId) -> StoreResult<()> {
        self.create_target(reg, cid, oid).map(drop)
    }

    fn write(
        &self,
        reg: &Registry,
        cid: &CollectionId,
        oid: &ObjectId,
        offset: u64,
        data: &Bytes,
    ) -> StoreResult<()> {
        self.check_extent(offset, data.len() as u64)?;
        let obj = self.create_target(reg, cid, oid)?;
        let before = obj.size();
        obj.payload().write(offset, data);
        account(reg, &obj, before);
        Ok(())
    }

    fn zero(
        &self,
        reg: &Registry,
        cid: &CollectionId,
        oid: &ObjectId,
        offset: u64,
        len: u64,
    ) -> StoreResult<()> {
        self.check_extent(offset, len)?;
        let obj = self.create_target(reg, cid, oid)?;
        let before = obj.size();
        obj.payload().zero(offset, len);
        account(reg, &obj, before);
        Ok(())
    }

    fn truncate(
        &self,
        reg: &Registry,
        cid: &CollectionId,
        oid: &ObjectId,
        size: u64,
    ) -> StoreResult<()> {
        let obj = existing(reg, cid, oid)?;
        self.check_extent(0, size)?;
        let before = obj.size();
        obj.payload().truncate(size);
        account(reg, &obj, before);
        Ok(())
    }

    fn remove(&self, reg: &Registry, cid: &CollectionId, oid: &ObjectId) -> StoreResult<()> {
        let coll = reg.require(cid)?;
        let obj = coll.remove(oid).ok_or_else(|| not_found(cid, oid))?;
        reg.sub_used(obj.size());
        Ok(())
    }

    fn clone_object(
        &self,
        reg: &Registry,
        cid: &CollectionId,
        src: &ObjectId,
        dst: &ObjectId,
    ) -> StoreResult<()> {
        let from = existing(reg, cid, src)?;
        if src == dst {
            return Ok(());
        }
        let to = self.create_target(reg, cid, dst)?;
        if Arc::ptr_eq(&from, &to) {
            return Ok(());
        }
        let before = to.size();
        to.copy_from(&from);
        account(reg, &to, before);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn clone_range(
        &self,
        reg: &Registry,
        cid: &CollectionId,
        src: &ObjectId,
        dst: &ObjectId,
        src_offset: u64,
        len: u64,
        dst_offset: u64,
    ) -> StoreResult<()> {
        let from = existing(reg, cid, src)?;
        let src_size = from.size();
        if src_offset >= src_size {
            return Ok(());
        }
        let len = len.min(src_size - src_offset);
        self.check_extent(dst_offset, len)?;
        let to = self.create_target(reg, cid, dst)?;
        let before = to.size();
        to.payload()
            .clone_range(from.payload(), src_offset, len, dst_offset);
        account(reg, &to, before);
        Ok(())
    }

    fn destroy_collection(&self, reg: &Registry, cid: &CollectionId) -> StoreResult<()> {
        let coll = reg.require(cid)?;
        if !coll.is_empty() {
            return Err(StoreError::CollectionNotEmpty(cid.clone()));
        }
        let bytes = coll.used_bytes();
        reg.remove(cid);
        reg.sub_used(bytes);
        info!(%cid, "collection destroyed");
        Ok(())
    }

    fn collection_add(
        &self,
        reg: &Registry,
        dst: &CollectionId,
        src: &CollectionId,
        oid: &ObjectId,
    ) -> StoreResult<()> {
        let to = reg.require(dst)?;
        let from = reg.require(src)?;
        let obj = from.get(oid).ok_or_else(|| not_found(src, oid))?;
        let size = obj.size();
        if !to.insert(oid.clone(), obj) {
            return Err(StoreError::ObjectExists {
                cid: dst.clone(),
                oid: oid.clone(),
            });
        }
        reg.add_used(size);
        Ok(())
    }

    fn move_rename(
        &self,
        reg: &Registry,
        src_cid: &CollectionId,
        src_oid: &ObjectId,
        dst_cid: &CollectionId,
        dst_oid: &ObjectId,
    ) -> StoreResult<()> {
        let from = reg.require(src_cid)?;
        let to = reg.require(dst_cid)?;
        let obj = from.get(src_oid).ok_or_else(|| not_found(src_cid, src_oid))?;
        self.check_object_name(dst_oid)?;
        if !to.insert(dst_oid.clone(), obj) {
            return Err(StoreError::ObjectExists {
                cid: dst_cid.clone(),
                oid: dst_oid.clone(),
            });
        }
        from.remove(src_oid);
        Ok(())
    }

    fn split_collection(
        &self,
        reg: &Registry,
        cid: &CollectionId,
        bits: u32,
        rem: u32,
        dest: &CollectionId,
    ) -> StoreResult<()> {
        let src: CollectionRef = reg.require(cid)?;
        let dst: CollectionRef = reg.require(dest)?;
        if cid == dest {
            return Ok(());
        }
        let moved = src.split_into(&dst, bits, rem);
        debug!(%cid, %dest, bits, rem, moved, "collection split");
        Ok(())
    }
}

/// Apply an object's size change once per collection entry that links it.
fn account(reg: &Registry, obj: &ObjectRef, before: u64) {
    let links = obj.links();
    reg.adjust_used(
        before.saturating_mul(links),
        obj.size().saturating_mul(links),
    );
}

fn not_found(cid: &CollectionId, oid: &ObjectId) -> StoreError {
    StoreError::ObjectNotFound {
        cid: cid.clone(),
        oid: oid.clone(),
    }
}

/// Fetch an object that must already exist.
fn existing(reg: &Registry, cid: &CollectionId, oid: &ObjectId) -> StoreResult<ObjectRef> {
    reg.require(cid)?
        .get(oid)
        .ok_or_else(|| not_found(cid, oid))
}
