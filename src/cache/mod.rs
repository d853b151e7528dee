//! Versioned response storage.
//!
//! The store is partitioned into namespaces named after a [`CacheVersion`].
//! Staleness is handled by dropping whole namespaces on version bumps, never
//! by per-entry expiry.

mod memory;
mod storage;
mod traits;

pub use memory::MemoryStore;
pub use storage::SqliteStore;
pub use traits::{CacheStore, CacheVersion, EntryKey, Namespace, ResponseSource, Served};
