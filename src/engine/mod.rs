//! LEVEE - Storage Engine Boundary
//! The binding layer only ever talks to a storage engine through the
//! traits below; every call is synchronous and blocking, and is made from
//! the exec phase of an operation.
//!
//! The crate ships one implementation, [`store::Store`]: a multi-version
//! MemTable made durable by a write-ahead log.

pub mod cursor;
pub mod memtable;
pub mod metrics;
pub mod store;
pub mod wal;

use std::path::Path;
use std::sync::Arc;

use crate::config::{Options, WriteOptions};
use crate::error::EngineResult;
use crate::types::{Key, SnapshotToken, Value, WriteBatch};

pub use self::store::{DiskBackend, Store};

/// Engine-side read options, stripped of host proxies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadView {
    pub verify_checksums: bool,
    pub fill_cache: bool,
    /// Read as of this snapshot instead of the latest state.
    pub snapshot: Option<SnapshotToken>,
}

/// An open engine instance.
pub trait Engine: Send + Sync {
    /// Point lookup. `Ok(None)` means the key is absent.
    fn get(&self, view: &ReadView, key: &[u8]) -> EngineResult<Option<Value>>;

    /// Apply a batch atomically.
    fn write(&self, options: &WriteOptions, batch: &WriteBatch) -> EngineResult<()>;

    /// Create a cursor over a consistent view of the key space.
    fn new_cursor(&self, view: &ReadView) -> EngineResult<Box<dyn Cursor>>;

    /// Pin the current state as a snapshot.
    fn snapshot(&self) -> EngineResult<SnapshotToken>;

    /// Unpin a snapshot. Releasing an unknown token is a no-op.
    fn release_snapshot(&self, token: SnapshotToken);

    /// Introspection by name; `None` for unknown properties.
    fn property(&self, name: &str) -> Option<String>;

    /// Approximate bytes stored in each `[start, limit)` range.
    fn approximate_sizes(&self, ranges: &[(Key, Key)]) -> EngineResult<Vec<u64>>;

    /// Flush and shut the instance down. Later calls report `Closed`.
    fn close(&self) -> EngineResult<()>;
}

/// A positioned view over the key space. Not safe for concurrent use;
/// callers serialize access.
pub trait Cursor: Send {
    fn valid(&self) -> bool;
    fn seek_to_first(&mut self);
    fn seek_to_last(&mut self);
    fn seek(&mut self, target: &[u8]);
    fn next(&mut self);
    fn prev(&mut self);
    /// Key at the current position, `None` when not positioned.
    fn key(&self) -> Option<&Key>;
    /// Value at the current position, `None` when not positioned.
    fn value(&self) -> Option<&Value>;
    /// Error state of the last movement.
    fn status(&self) -> EngineResult<()>;
}

/// Factory for engine instances and offline maintenance.
pub trait Backend: Send + Sync {
    fn open(&self, path: &Path, options: &Options) -> EngineResult<Arc<dyn Engine>>;
    fn destroy(&self, path: &Path, options: &Options) -> EngineResult<()>;
    fn repair(&self, path: &Path, options: &Options) -> EngineResult<()>;
}
