//! Snapshot persistence for scheduling registries.
//!
//! Each registry writes its complete entry set as one JSON document
//! (`{timestamp, entries, completed}`) on every mutation and reads it
//! back once at startup. Writes go to a temp file that is renamed over the target, so
//! a crash mid-write leaves the previous snapshot intact.

pub mod error;
pub mod snapshot;

pub use error::{PersistenceError, PersistenceResult};
pub use snapshot::{JsonFileStore, MemoryStore, Snapshot, SnapshotStore};
