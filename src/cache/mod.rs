//! The read cache: last known value per key, bounded staleness, optional
//! durability underneath.
//!
//! All reads and writes in the crate go through [`CacheStore`]; nothing else
//! touches cached values. The store is purely in-memory and synchronous; a
//! [`SnapshotStorage`] backend may sit below it to survive restarts, but it is
//! never consulted on the read path.

mod persist;
mod store;

pub use persist::{NoopStorage, PersistError, PersistedEntry, SnapshotStorage, SqliteStorage};
pub use store::{CacheEntry, CacheStore, Cached};
