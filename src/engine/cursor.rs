//! LEVEE - Store Cursor
//! A cursor reads the MemTable as of the sequence number it pinned when it
//! was created. Every move re-enters the state read lock, so a cursor never
//! holds the lock between calls and writers are never blocked by it.

use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::types::{Key, Value};

use super::memtable::MemTable;
use super::store::Shared;
use super::Cursor;

pub struct StoreCursor {
    shared: Arc<Shared>,
    seq: u64,
    current: Option<(Key, Value)>,
    /// Set once a move found the store closed.
    closed_seen: bool,
}

impl StoreCursor {
    /// The caller must already have pinned `seq`; the cursor unpins it on drop.
    pub(super) fn new(shared: Arc<Shared>, seq: u64) -> Self {
        Self {
            shared,
            seq,
            current: None,
            closed_seen: false,
        }
    }

    fn step<F>(&mut self, locate: F)
    where
        F: for<'a> FnOnce(&'a MemTable, u64) -> Option<(&'a Key, &'a Value)>,
    {
        if self.shared.is_closed() {
            self.closed_seen = true;
            self.current = None;
            return;
        }
        self.shared.metrics.record_cursor_step();
        let state = self.shared.state.read();
        self.current = locate(&state.table, self.seq).map(|(k, v)| (k.clone(), v.clone()));
    }
}

impl Cursor for StoreCursor {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) {
        self.step(|table, seq| table.first(seq));
    }

    fn seek_to_last(&mut self) {
        self.step(|table, seq| table.last(seq));
    }

    fn seek(&mut self, target: &[u8]) {
        self.step(|table, seq| table.seek(target, seq));
    }

    fn next(&mut self) {
        let Some((key, _)) = self.current.take() else {
            return;
        };
        self.step(|table, seq| table.next_after(&key, seq));
    }

    fn prev(&mut self) {
        let Some((key, _)) = self.current.take() else {
            return;
        };
        self.step(|table, seq| table.prev_before(&key, seq));
    }

    fn key(&self) -> Option<&Key> {
        self.current.as_ref().map(|(k, _)| k)
    }

    fn value(&self) -> Option<&Value> {
        self.current.as_ref().map(|(_, v)| v)
    }

    fn status(&self) -> EngineResult<()> {
        if self.closed_seen {
            Err(EngineError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Drop for StoreCursor {
    fn drop(&mut self) {
        self.shared.state.write().unpin(self.seq);
    }
}
