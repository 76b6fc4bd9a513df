//! Byte-range payload storage for memstore objects.
//!
//! An object's data lives in one of two stores, chosen when the object is
//! created and never changed afterwards:
//!
//! - [`PagedStore`] -- sparse, fixed-size pages allocated on first write.
//!   Clones of page-aligned ranges share pages copy-on-write.
//! - [`BufferStore`] -- one contiguous buffer behind a spinlock, for small
//!   objects.
//!
//! [`Payload`] is the closed sum of the two. Both stores share one contract:
//!
//! 1. `read` always returns exactly the requested number of bytes; anything
//!    past the logical size or inside an unwritten hole reads as zero.
//! 2. `write` extends the logical size as needed; gaps read as zero.
//! 3. `clone_range` has copy semantics: later writes to either side never
//!    show through to the other.
//! 4. `truncate` shrinks (discarding the tail) or grows (zero-filling).
//!
//! Each store guards its bytes with its own lock. Callers are expected to
//! serialize mutations of a single object; the locks only make concurrent
//! reads safe and keep the stores memory-safe if that expectation is broken.

pub mod buffer;
pub mod page_set;
pub mod payload;
mod scratch;

pub use buffer::BufferStore;
pub use page_set::{Page, PageRef, PagedStore, DEFAULT_PAGE_SIZE};
pub use payload::{Payload, PayloadKind};
