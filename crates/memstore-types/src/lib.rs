//! Foundation types for the in-memory object store.
//!
//! Every other memstore crate depends on `memstore-types`.
//!
//! # Key Types
//!
//! - [`ObjectId`] -- Generalized object identifier with hash-bitwise ordering
//! - [`CollectionId`] -- Name of a collection (a placement-group style bucket)

pub mod collection;
pub mod error;
pub mod object;

pub use collection::CollectionId;
pub use error::TypeError;
pub use object::{ObjectId, NOSNAP, NO_GEN, NO_SHARD};
