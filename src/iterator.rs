//! LEVEE - Iterator Resource
//! Wraps a native cursor. The cursor itself lives in a `NativeIterator`
//! that is shared with worker threads; everything host-facing (the
//! exclusivity flag, the registry entry, the handle reference) stays in
//! `IteratorCore` on the event-loop thread.
//!
//! ## Rules
//! - One operation at a time: starting a second one while the first is in
//!   flight fails with `ConcurrentAccess`, it is never queued
//! - A closed iterator reports `IllegalState` for every operation
//! - `next`/`prev` on an unpositioned cursor is `IllegalState`; reading
//!   key or value there yields `None`
//! - Closing while an operation is in flight is allowed: the cursor is
//!   dropped as soon as that operation releases it

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::database::HandleInner;
use crate::engine::Cursor;
use crate::error::{Error, Result};
use crate::host::payload::{to_engine_bytes, to_host};
use crate::host::{HostValue, Payload};
use crate::registry::ResourceId;
use crate::runtime::{Operation, Resource};

/// Cursor state reachable from worker threads.
pub(crate) struct NativeIterator {
    closed: AtomicBool,
    positioned: AtomicBool,
    cursor: Mutex<Option<Box<dyn Cursor>>>,
}

enum Movement {
    First,
    Last,
    Seek(Bytes),
    Next,
    Prev,
}

type Entry = (Bytes, Bytes);

impl NativeIterator {
    fn new(cursor: Box<dyn Cursor>) -> Self {
        Self {
            closed: AtomicBool::new(false),
            positioned: AtomicBool::new(false),
            cursor: Mutex::new(Some(cursor)),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns false if it was already closed.
    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.positioned.store(false, Ordering::Release);
        self.drop_cursor();
        true
    }

    /// Drop the cursor unless an operation is using it right now.
    fn drop_cursor(&self) {
        if let Some(mut slot) = self.cursor.try_lock() {
            slot.take();
        }
    }

    fn with_cursor<R>(&self, f: impl FnOnce(&mut dyn Cursor) -> Result<R>) -> Result<R> {
        let mut slot = self.cursor.lock();
        if self.is_closed() {
            return Err(Error::illegal("iterator is closed"));
        }
        match slot.as_deref_mut() {
            Some(cursor) => f(cursor),
            None => Err(Error::illegal("iterator is closed")),
        }
    }

    fn apply(&self, cursor: &mut dyn Cursor, movement: Movement) -> Result<bool> {
        match movement {
            Movement::First => cursor.seek_to_first(),
            Movement::Last => cursor.seek_to_last(),
            Movement::Seek(target) => cursor.seek(&target),
            Movement::Next | Movement::Prev if !cursor.valid() => {
                return Err(Error::illegal("iterator is not positioned"));
            }
            Movement::Next => cursor.next(),
            Movement::Prev => cursor.prev(),
        }
        cursor.status()?;
        let valid = cursor.valid();
        self.positioned.store(valid, Ordering::Release);
        Ok(valid)
    }

    fn read(cursor: &dyn Cursor) -> Result<Option<Entry>> {
        cursor.status()?;
        Ok(match (cursor.key(), cursor.value()) {
            (Some(key), Some(value)) => Some((key.clone(), value.clone())),
            _ => None,
        })
    }

    fn step(&self, movement: Movement) -> Result<bool> {
        self.with_cursor(|cursor| self.apply(cursor, movement))
    }

    fn entry(&self) -> Result<Option<Entry>> {
        self.with_cursor(|cursor| Self::read(cursor))
    }

    fn step_entry(&self, movement: Movement) -> Result<Option<Entry>> {
        self.with_cursor(|cursor| {
            self.apply(cursor, movement)?;
            Self::read(cursor)
        })
    }
}

pub(crate) struct IteratorCore {
    id: ResourceId,
    native: Arc<NativeIterator>,
    /// Exclusivity flag. Only touched on the event-loop thread.
    busy: Cell<bool>,
    as_buffer: bool,
    handle: Rc<HandleInner>,
}

impl IteratorCore {
    /// Close the native cursor without touching the registry.
    pub(crate) fn close_native(&self) {
        if self.native.close() {
            log::trace!("Iterator {} closed", self.id);
        }
    }
}

impl Resource for IteratorCore {
    fn acquire(&self) -> Result<()> {
        if self.native.is_closed() {
            return Err(Error::illegal("iterator is closed"));
        }
        if self.busy.replace(true) {
            return Err(Error::ConcurrentAccess);
        }
        Ok(())
    }

    fn release(&self) {
        self.busy.set(false);
        if self.native.is_closed() {
            self.native.drop_cursor();
        }
    }
}

impl Drop for IteratorCore {
    fn drop(&mut self) {
        self.close_native();
        self.handle.iterators.borrow_mut().remove(self.id);
    }
}

/// Host-visible proxy for an iterator. Clones share the same cursor; the
/// cursor is finalized when the last clone (and any in-flight operation)
/// is gone.
#[derive(Clone)]
pub struct DbIterator {
    core: Rc<IteratorCore>,
}

macro_rules! movement_ops {
    ($(#[$doc:meta])* $name:ident, $name_async:ident, $movement:expr) => {
        $(#[$doc])*
        pub fn $name(&self) -> Result<bool> {
            self.move_op(stringify!($name), $movement).run_sync()
        }

        pub fn $name_async<F>(&self, callback: F) -> Result<()>
        where
            F: FnOnce(Result<bool>) + 'static,
        {
            self.move_op(stringify!($name), $movement)
                .run_async(self.core.handle.event_loop(), callback)
        }
    };
}

impl DbIterator {
    pub(crate) fn register(handle: Rc<HandleInner>, cursor: Box<dyn Cursor>, as_buffer: bool) -> Self {
        let id = handle.iterators.borrow_mut().allocate();
        let core = Rc::new(IteratorCore {
            id,
            native: Arc::new(NativeIterator::new(cursor)),
            busy: Cell::new(false),
            as_buffer,
            handle,
        });
        core.handle.iterators.borrow_mut().insert(id, &core);
        log::trace!("Iterator {} created", id);
        Self { core }
    }

    pub fn id(&self) -> ResourceId {
        self.core.id
    }

    /// Positioned on an entry, as of the last completed operation.
    pub fn valid(&self) -> bool {
        !self.core.native.is_closed() && self.core.native.positioned.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.core.native.is_closed()
    }

    /// Close the cursor. Idempotent.
    pub fn close(&self) {
        self.core.close_native();
        self.core.handle.iterators.borrow_mut().remove(self.core.id);
    }

    fn resource(&self) -> Rc<dyn Resource> {
        self.core.clone()
    }

    fn move_op(&self, label: &'static str, movement: Movement) -> Operation<Result<bool>, bool> {
        let native = self.core.native.clone();
        Operation::new(label, move || native.step(movement), |moved| moved)
            .owned_by(self.resource())
    }

    fn read_op<T, F>(&self, label: &'static str, pick: F) -> Operation<Result<Option<Entry>>, Option<T>>
    where
        T: 'static,
        F: FnOnce(Entry, bool) -> T + 'static,
    {
        let native = self.core.native.clone();
        let as_buffer = self.core.as_buffer;
        Operation::new(label, move || native.entry(), move |entry| {
            Ok(entry?.map(|entry| pick(entry, as_buffer)))
        })
        .owned_by(self.resource())
    }

    movement_ops!(
        /// Position at the first entry.
        first,
        first_async,
        Movement::First
    );
    movement_ops!(
        /// Position at the last entry.
        last,
        last_async,
        Movement::Last
    );
    movement_ops!(next, next_async, Movement::Next);
    movement_ops!(prev, prev_async, Movement::Prev);

    /// Position at the first entry at or after `target`.
    pub fn seek(&self, target: impl Into<HostValue>) -> Result<bool> {
        let target = to_engine_bytes(&target.into())?;
        self.move_op("seek", Movement::Seek(target)).run_sync()
    }

    pub fn seek_async<F>(&self, target: impl Into<HostValue>, callback: F) -> Result<()>
    where
        F: FnOnce(Result<bool>) + 'static,
    {
        let target = to_engine_bytes(&target.into())?;
        self.move_op("seek", Movement::Seek(target))
            .run_async(self.core.handle.event_loop(), callback)
    }

    pub fn key(&self) -> Result<Option<Payload>> {
        self.read_op("key", |(key, _), as_buffer| to_host(&key, as_buffer))
            .run_sync()
    }

    pub fn key_async<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(Result<Option<Payload>>) + 'static,
    {
        self.read_op("key", |(key, _), as_buffer| to_host(&key, as_buffer))
            .run_async(self.core.handle.event_loop(), callback)
    }

    pub fn value(&self) -> Result<Option<Payload>> {
        self.read_op("value", |(_, value), as_buffer| to_host(&value, as_buffer))
            .run_sync()
    }

    pub fn value_async<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(Result<Option<Payload>>) + 'static,
    {
        self.read_op("value", |(_, value), as_buffer| to_host(&value, as_buffer))
            .run_async(self.core.handle.event_loop(), callback)
    }

    /// Key and value at the current position.
    pub fn current(&self) -> Result<Option<(Payload, Payload)>> {
        self.read_op("current", entry_payloads).run_sync()
    }

    pub fn current_async<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(Result<Option<(Payload, Payload)>>) + 'static,
    {
        self.read_op("current", entry_payloads)
            .run_async(self.core.handle.event_loop(), callback)
    }

    fn step_entry_async<F>(&self, movement: Movement, callback: F) -> Result<()>
    where
        F: FnOnce(Result<Option<Entry>>) + 'static,
    {
        let native = self.core.native.clone();
        Operation::new("range_step", move || native.step_entry(movement), |entry| entry)
            .owned_by(self.resource())
            .run_async(self.core.handle.event_loop(), callback)
    }

    /// Walk forward from `start` (or the first entry) up to and including
    /// `limit` (or the end), handing each entry to `each`. `done` receives
    /// the number of entries visited, or the first error.
    pub fn for_range<E, D>(&self, start: Option<HostValue>, limit: Option<HostValue>, each: E, done: D) -> Result<()>
    where
        E: FnMut(Payload, Payload) + 'static,
        D: FnOnce(Result<usize>) + 'static,
    {
        let first = match start {
            Some(start) => Movement::Seek(to_engine_bytes(&start)?),
            None => Movement::First,
        };
        let limit = limit.map(|limit| to_engine_bytes(&limit)).transpose()?;
        let walk = Rc::new(RangeWalk {
            iterator: self.clone(),
            limit,
            each: RefCell::new(Box::new(each)),
            done: Cell::new(Some(Box::new(done))),
            visited: Cell::new(0),
        });
        walk.step(first)
    }
}

fn entry_payloads((key, value): Entry, as_buffer: bool) -> (Payload, Payload) {
    (to_host(&key, as_buffer), to_host(&value, as_buffer))
}

/// State of one `for_range` walk, shared by its chained steps.
struct RangeWalk {
    iterator: DbIterator,
    limit: Option<Bytes>,
    each: RefCell<Box<dyn FnMut(Payload, Payload)>>,
    done: Cell<Option<Box<dyn FnOnce(Result<usize>)>>>,
    visited: Cell<usize>,
}

impl RangeWalk {
    fn step(self: &Rc<Self>, movement: Movement) -> Result<()> {
        let walk = self.clone();
        self.iterator
            .step_entry_async(movement, move |entry| walk.on_entry(entry))
    }

    fn finish(&self, result: Result<usize>) {
        if let Some(done) = self.done.take() {
            done(result);
        }
    }

    fn on_entry(self: Rc<Self>, entry: Result<Option<Entry>>) {
        let (key, value) = match entry {
            Ok(Some(entry)) => entry,
            Ok(None) => return self.finish(Ok(self.visited.get())),
            Err(e) => return self.finish(Err(e)),
        };
        if self.limit.as_ref().map_or(false, |limit| key > *limit) {
            return self.finish(Ok(self.visited.get()));
        }

        let as_buffer = self.iterator.core.as_buffer;
        {
            let mut each = self.each.borrow_mut();
            (*each)(to_host(&key, as_buffer), to_host(&value, as_buffer));
        }
        self.visited.set(self.visited.get() + 1);

        if let Err(e) = self.step(Movement::Next) {
            self.finish(Err(e));
        }
    }
}

impl fmt::Debug for DbIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbIterator")
            .field("id", &self.core.id)
            .field("closed", &self.is_closed())
            .field("valid", &self.valid())
            .finish()
    }
}
