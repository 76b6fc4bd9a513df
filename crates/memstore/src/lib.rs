//! In-memory object store backend.
//!
//! Every object lives in RAM inside a named collection. An object carries a
//! byte payload, a set of extended attributes, and an ordered key/value map
//! (the omap) with an optional header. All mutations arrive as ordered
//! [`Transaction`] batches; reads go straight to the current state.
//!
//! # Key Types
//!
//! - [`MemStore`] -- the store, implementing [`ObjectStore`]
//! - [`Transaction`] / [`Op`] -- ordered mutation batches
//! - [`Sequencer`] -- per-stream ordering handle for submitters
//! - [`Collection`] / [`Object`] -- the stored state
//! - [`OmapIterator`] -- ordered cursor over one object's omap
//!
//! # Design Rules
//!
//! 1. One batch applies at a time; a failed operation is recorded and the
//!    rest of the batch still runs. Nothing is rolled back.
//! 2. `used_bytes` always equals the sum of object sizes over every
//!    collection entry.
//! 3. Completion callbacks run on a dedicated finisher thread in submission
//!    order, after `on_applied_sync` callbacks have run inline.
//! 4. Nothing touches disk except explicit [`MemStore::save`] and
//!    [`MemStore::load`].

pub mod collection;
pub mod config;
pub mod engine;
pub mod error;
pub mod finisher;
pub mod object;
pub mod omap_iter;
pub mod registry;
pub mod sequencer;
pub mod snapshot;
pub mod store;
pub mod traits;
pub mod transaction;

// Re-export primary types at crate root for ergonomic imports.
pub use collection::{Collection, CollectionRef};
pub use config::MemStoreConfig;
pub use engine::{Engine, EngineLimits, EngineState, OpFailure, TransactionReport};
pub use error::{errno, StoreError, StoreResult};
pub use finisher::Finisher;
pub use memstore_types::{CollectionId, ObjectId};
pub use object::{Object, ObjectRef, Omap};
pub use omap_iter::OmapIterator;
pub use registry::Registry;
pub use sequencer::Sequencer;
pub use store::MemStore;
pub use traits::{ObjectStat, ObjectStore};
pub use transaction::{Callback, Op, Transaction};
