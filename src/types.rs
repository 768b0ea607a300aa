//! LEVEE - Core Type Definitions
//! Defines the engine-side types that cross the worker-thread boundary.
//! Everything here is `Send`; host-visible values live in `crate::host`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Key type for the storage engine.
/// `Bytes` keeps engine-owned buffers cheap to share between a cursor
/// and the result slot of an operation.
pub type Key = Bytes;

/// Value type for the storage engine.
pub type Value = Bytes;

/// A point-in-time read view handed out by the engine.
/// The token is immutable after creation; it is just the sequence number
/// the view is pinned at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnapshotToken(pub u64);

impl SnapshotToken {
    pub fn sequence(self) -> u64 {
        self.0
    }
}

/// A single mutation inside a write batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOp {
    Put { key: Key, value: Value },
    Delete { key: Key },
}

impl BatchOp {
    pub fn key(&self) -> &Key {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Delete { key } => key,
        }
    }

    fn encoded_size(&self) -> usize {
        match self {
            BatchOp::Put { key, value } => key.len() + value.len(),
            BatchOp::Delete { key } => key.len(),
        }
    }
}

/// An ordered sequence of put/delete operations applied atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
    size_bytes: usize,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a PUT operation.
    pub fn put(&mut self, key: Key, value: Value) {
        self.push(BatchOp::Put { key, value });
    }

    /// Queue a DELETE operation.
    pub fn delete(&mut self, key: Key) {
        self.push(BatchOp::Delete { key });
    }

    fn push(&mut self, op: BatchOp) {
        self.size_bytes += op.encoded_size();
        self.ops.push(op);
    }

    /// Drop every queued operation.
    pub fn clear(&mut self) {
        self.ops.clear();
        self.size_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Approximate payload size in bytes (keys + values).
    pub fn size(&self) -> usize {
        self.size_bytes
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}
