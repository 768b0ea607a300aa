//! LEVEE - Database Handle
//! Owns one open engine instance (or none while closed) and the weak
//! registries of the iterators and snapshots created from it.
//!
//! ## Ownership
//! - Dependents hold a strong `Rc` to the handle; the handle only records
//!   their ids, so neither side keeps the other alive in a cycle
//! - Every operation keeps the handle alive until its result is delivered
//! - The engine goes away on explicit close, on reopen, or when the last
//!   reference to the handle is dropped. Dependents are always neutralized
//!   first.
//!
//! Each method comes in two shapes: `op(..)` runs inline and returns the
//! result, `op_async(.., callback)` queues the native work and delivers the
//! result to `callback` on the event-loop thread. Both report invalid
//! arguments and closed-handle errors before any work is scheduled.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use bytes::Bytes;

use crate::batch::{Batch, BatchPin};
use crate::config::{Options, ReadOptions, WriteOptions};
use crate::context::Context;
use crate::engine::{Cursor, Engine, ReadView};
use crate::error::{EngineResult, Error, Result};
use crate::host::payload::{to_engine_bytes, to_host};
use crate::host::{HostValue, Payload};
use crate::iterator::{DbIterator, IteratorCore};
use crate::registry::Registry;
use crate::runtime::{EventLoop, Operation, Resource};
use crate::snapshot::{Snapshot, SnapshotCore, SnapshotUse};
use crate::status::Status;
use crate::types::{SnapshotToken, WriteBatch};

pub(crate) struct HandleInner {
    ctx: Context,
    engine: RefCell<Option<Arc<dyn Engine>>>,
    /// Bumped whenever a close or reopen is submitted, so results produced
    /// against an earlier engine can be recognized as stale.
    generation: Cell<u64>,
    location: RefCell<Option<PathBuf>>,
    options: RefCell<Options>,
    pub(crate) iterators: RefCell<Registry<IteratorCore>>,
    pub(crate) snapshots: RefCell<Registry<SnapshotCore>>,
}

impl HandleInner {
    pub(crate) fn event_loop(&self) -> &EventLoop {
        self.ctx.event_loop()
    }

    pub(crate) fn is_open(&self) -> bool {
        self.engine.borrow().is_some()
    }

    pub(crate) fn current_engine(&self) -> Option<Arc<dyn Engine>> {
        self.engine.borrow().clone()
    }

    fn engine(&self) -> Result<Arc<dyn Engine>> {
        self.current_engine()
            .ok_or_else(|| Error::illegal("database is not open"))
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.get()
    }

    /// Begin a close or reopen: results still in flight against the
    /// current engine become stale.
    fn advance(&self) -> u64 {
        let next = self.generation.get() + 1;
        self.generation.set(next);
        next
    }

    /// Resolve read options against this handle. The returned use keeps
    /// the snapshot pinned and must outlive the read.
    fn read_view(self: &Rc<Self>, options: &ReadOptions) -> Result<(ReadView, Option<SnapshotUse>)> {
        let (snapshot, claim) = match &options.snapshot {
            Some(snapshot) => {
                let (token, claim) = snapshot.claim_for(self)?;
                (Some(token), Some(claim))
            }
            None => (None, None),
        };
        let view = ReadView {
            verify_checksums: options.verify_checksums,
            fill_cache: options.fill_cache,
            snapshot,
        };
        Ok((view, claim))
    }

    /// Neutralize every dependent, then hand back the engine (if any) for
    /// the caller to close.
    fn shutdown(&self) -> Option<Arc<dyn Engine>> {
        let iterators = self.iterators.borrow_mut().drain_live();
        let snapshots = self.snapshots.borrow_mut().drain_live();
        for iterator in &iterators {
            iterator.close_native();
        }
        for snapshot in &snapshots {
            snapshot.release_token();
        }
        let engine = self.engine.borrow_mut().take();
        if engine.is_some() {
            log::debug!(
                "Shutting down {:?}: closed {} iterators, released {} snapshots",
                self.location.borrow(),
                iterators.len(),
                snapshots.len()
            );
        }
        engine
    }

    fn install(&self, engine: Arc<dyn Engine>, path: PathBuf, options: Options) {
        if let Some(previous) = self.shutdown() {
            if let Err(e) = previous.close() {
                log::error!("Failed to close replaced engine: {}", e);
            }
        }
        log::info!("Database open at {:?}", path);
        *self.engine.borrow_mut() = Some(engine);
        *self.location.borrow_mut() = Some(path);
        *self.options.borrow_mut() = options;
    }
}

impl Resource for HandleInner {
    fn acquire(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::illegal("database is not open"))
        }
    }

    fn release(&self) {}
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.get_mut().take() {
            log::debug!("Finalizing database handle at {:?}", self.location.get_mut());
            if let Err(e) = engine.close() {
                log::error!("Failed to close engine on finalization: {}", e);
            }
        }
    }
}

/// Host-visible proxy for a database. Clones share the same handle.
#[derive(Clone)]
pub struct Database {
    inner: Rc<HandleInner>,
}

enum Maintenance {
    Destroy,
    Repair,
}

fn check_path(path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(Error::invalid("location must be a non-empty path"));
    }
    Ok(path.to_path_buf())
}

impl Database {
    /// A closed handle; `reopen` brings it to life.
    pub fn new(ctx: &Context) -> Self {
        Self {
            inner: Rc::new(HandleInner {
                ctx: ctx.clone(),
                engine: RefCell::new(None),
                generation: Cell::new(0),
                location: RefCell::new(None),
                options: RefCell::new(Options::default()),
                iterators: RefCell::new(Registry::new()),
                snapshots: RefCell::new(Registry::new()),
            }),
        }
    }

    pub fn open(ctx: &Context, path: impl AsRef<Path>, options: Options) -> Result<Self> {
        let db = Self::new(ctx);
        db.reopen(path, options)?;
        Ok(db)
    }

    pub fn open_async<F>(ctx: &Context, path: impl AsRef<Path>, options: Options, callback: F) -> Result<()>
    where
        F: FnOnce(Result<Database>) + 'static,
    {
        let db = Self::new(ctx);
        let opened = db.clone();
        db.reopen_async(path, options, move |result| callback(result.map(|()| opened)))
    }

    fn event_loop(&self) -> &EventLoop {
        self.inner.event_loop()
    }

    fn resource(&self) -> Rc<dyn Resource> {
        self.inner.clone()
    }

    pub(crate) fn handle(&self) -> &Rc<HandleInner> {
        &self.inner
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    /// Path of the currently open database.
    pub fn location(&self) -> Option<PathBuf> {
        self.inner.location.borrow().clone()
    }

    /// Options the current engine was opened with.
    pub fn options(&self) -> Options {
        self.inner.options.borrow().clone()
    }

    pub fn live_iterators(&self) -> usize {
        self.inner.iterators.borrow().len()
    }

    pub fn live_snapshots(&self) -> usize {
        self.inner.snapshots.borrow().len()
    }

    // -- open / close ----------------------------------------------------

    fn reopen_op(&self, path: &Path, options: Options) -> Result<Operation<EngineResult<Arc<dyn Engine>>, ()>> {
        let path = check_path(path)?;
        let previous = self.inner.shutdown();
        let generation = self.inner.advance();
        let backend = self.inner.ctx.backend().clone();
        let handle = self.inner.clone();
        let (exec_path, exec_options) = (path.clone(), options.clone());

        Ok(Operation::new(
            "open",
            move || {
                if let Some(previous) = previous {
                    previous.close()?;
                }
                backend.open(&exec_path, &exec_options)
            },
            move |opened| {
                let engine = opened?;
                // A later close or reopen was submitted while this one ran.
                if handle.generation() != generation {
                    log::debug!("Discarding superseded open of {:?}", path);
                    if let Err(e) = engine.close() {
                        log::error!("Failed to close superseded engine: {}", e);
                    }
                    return Err(Error::illegal("database closed while opening"));
                }
                handle.install(engine, path, options);
                Ok(())
            },
        ))
    }

    /// Open `path` into this handle, closing whatever it had open first.
    pub fn reopen(&self, path: impl AsRef<Path>, options: Options) -> Result<()> {
        self.reopen_op(path.as_ref(), options)?.run_sync()
    }

    pub fn reopen_async<F>(&self, path: impl AsRef<Path>, options: Options, callback: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + 'static,
    {
        self.reopen_op(path.as_ref(), options)?
            .run_async(self.event_loop(), callback)
    }

    fn close_op(&self) -> Operation<EngineResult<()>, ()> {
        let engine = self.inner.shutdown();
        let generation = self.inner.advance();
        let handle = self.inner.clone();
        Operation::new(
            "close",
            move || match engine {
                Some(engine) => engine.close(),
                None => Ok(()),
            },
            move |closed| {
                closed?;
                if handle.generation() == generation {
                    if let Some(path) = handle.location.borrow_mut().take() {
                        log::info!("Database closed at {:?}", path);
                    }
                }
                Ok(())
            },
        )
    }

    /// Close the handle. Closing a closed handle is a no-op.
    pub fn close(&self) -> Result<()> {
        self.close_op().run_sync()
    }

    pub fn close_async<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + 'static,
    {
        self.close_op().run_async(self.event_loop(), callback)
    }

    // -- reads -----------------------------------------------------------

    fn get_op(&self, key: HostValue, options: ReadOptions) -> Result<Operation<EngineResult<Option<Bytes>>, Option<Payload>>> {
        let key = to_engine_bytes(&key)?;
        let engine = self.inner.engine()?;
        let (view, claim) = self.inner.read_view(&options)?;
        let as_buffer = options.as_buffer;

        Ok(Operation::new(
            "get",
            move || engine.get(&view, &key),
            move |found| {
                // The snapshot stays pinned until the read lands.
                drop(claim);
                Status::from_lookup(found)
                    .map(|value| to_host(&value, as_buffer))
                    .into_result()
            },
        )
        .owned_by(self.resource()))
    }

    /// Point lookup. `Ok(None)` when the key is absent.
    pub fn get(&self, key: impl Into<HostValue>, options: ReadOptions) -> Result<Option<Payload>> {
        self.get_op(key.into(), options)?.run_sync()
    }

    pub fn get_async<F>(&self, key: impl Into<HostValue>, options: ReadOptions, callback: F) -> Result<()>
    where
        F: FnOnce(Result<Option<Payload>>) + 'static,
    {
        self.get_op(key.into(), options)?
            .run_async(self.event_loop(), callback)
    }

    // -- writes ----------------------------------------------------------

    pub(crate) fn commit_op(
        &self,
        label: &'static str,
        ops: Arc<WriteBatch>,
        options: WriteOptions,
        pin: Option<BatchPin>,
    ) -> Result<Operation<EngineResult<()>, ()>> {
        let engine = self.inner.engine()?;
        Ok(Operation::new(
            label,
            move || engine.write(&options, &ops),
            move |written| {
                written?;
                if let Some(pin) = pin {
                    pin.committed();
                }
                Ok(())
            },
        )
        .owned_by(self.resource()))
    }

    fn single_op(&self, label: &'static str, op: WriteBatch, options: WriteOptions) -> Result<Operation<EngineResult<()>, ()>> {
        self.commit_op(label, Arc::new(op), options, None)
    }

    fn put_batch(key: HostValue, value: HostValue) -> Result<WriteBatch> {
        let mut batch = WriteBatch::new();
        batch.put(to_engine_bytes(&key)?, to_engine_bytes(&value)?);
        Ok(batch)
    }

    fn delete_batch(key: HostValue) -> Result<WriteBatch> {
        let mut batch = WriteBatch::new();
        batch.delete(to_engine_bytes(&key)?);
        Ok(batch)
    }

    pub fn put(&self, key: impl Into<HostValue>, value: impl Into<HostValue>, options: WriteOptions) -> Result<()> {
        let batch = Self::put_batch(key.into(), value.into())?;
        self.single_op("put", batch, options)?.run_sync()
    }

    pub fn put_async<F>(&self, key: impl Into<HostValue>, value: impl Into<HostValue>, options: WriteOptions, callback: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + 'static,
    {
        let batch = Self::put_batch(key.into(), value.into())?;
        self.single_op("put", batch, options)?
            .run_async(self.event_loop(), callback)
    }

    pub fn delete(&self, key: impl Into<HostValue>, options: WriteOptions) -> Result<()> {
        let batch = Self::delete_batch(key.into())?;
        self.single_op("delete", batch, options)?.run_sync()
    }

    pub fn delete_async<F>(&self, key: impl Into<HostValue>, options: WriteOptions, callback: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + 'static,
    {
        let batch = Self::delete_batch(key.into())?;
        self.single_op("delete", batch, options)?
            .run_async(self.event_loop(), callback)
    }

    /// Apply every operation in `batch` atomically. The batch cannot be
    /// modified until the write has been delivered.
    pub fn write(&self, batch: &Batch, options: WriteOptions) -> Result<()> {
        let pin = batch.pin(false);
        self.commit_op("write", pin.ops(), options, Some(pin))?.run_sync()
    }

    pub fn write_async<F>(&self, batch: &Batch, options: WriteOptions, callback: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + 'static,
    {
        let pin = batch.pin(false);
        self.commit_op("write", pin.ops(), options, Some(pin))?
            .run_async(self.event_loop(), callback)
    }

    /// A batch bound to this handle; its own `write` clears it on success.
    pub fn batch(&self) -> Batch {
        Batch::bound(self.clone())
    }

    // -- dependents ------------------------------------------------------

    fn iterator_op(&self, options: ReadOptions) -> Result<Operation<EngineResult<Box<dyn Cursor>>, DbIterator>> {
        let engine = self.inner.engine()?;
        let (view, claim) = self.inner.read_view(&options)?;
        let handle = self.inner.clone();
        let generation = handle.generation();
        let as_buffer = options.as_buffer;

        Ok(Operation::new(
            "iterator",
            move || engine.new_cursor(&view),
            move |cursor| {
                // The cursor pins its own view once created.
                drop(claim);
                let cursor = cursor?;
                if handle.generation() != generation || !handle.is_open() {
                    return Err(Error::illegal("database closed while creating iterator"));
                }
                Ok(DbIterator::register(handle, cursor, as_buffer))
            },
        )
        .owned_by(self.resource()))
    }

    pub fn iterator(&self, options: ReadOptions) -> Result<DbIterator> {
        self.iterator_op(options)?.run_sync()
    }

    pub fn iterator_async<F>(&self, options: ReadOptions, callback: F) -> Result<()>
    where
        F: FnOnce(Result<DbIterator>) + 'static,
    {
        self.iterator_op(options)?
            .run_async(self.event_loop(), callback)
    }

    fn snapshot_op(&self) -> Result<Operation<EngineResult<SnapshotToken>, Snapshot>> {
        let engine = self.inner.engine()?;
        let owner = engine.clone();
        let handle = self.inner.clone();
        let generation = handle.generation();

        Ok(Operation::new(
            "snapshot",
            move || engine.snapshot(),
            move |token| {
                let token = token?;
                if handle.generation() != generation || !handle.is_open() {
                    owner.release_snapshot(token);
                    return Err(Error::illegal("database closed while taking snapshot"));
                }
                Ok(Snapshot::register(handle, token))
            },
        )
        .owned_by(self.resource()))
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        self.snapshot_op()?.run_sync()
    }

    pub fn snapshot_async<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(Result<Snapshot>) + 'static,
    {
        self.snapshot_op()?.run_async(self.event_loop(), callback)
    }

    // -- introspection ---------------------------------------------------

    /// Engine property by name; `Ok(None)` for unknown names.
    pub fn property(&self, name: &str) -> Result<Option<String>> {
        let engine = self.inner.engine()?;
        let name = name.to_string();
        Operation::new("property", move || engine.property(&name), Ok)
            .owned_by(self.resource())
            .run_sync()
    }

    fn sizes_op(&self, boundaries: &[HostValue]) -> Result<Operation<EngineResult<Vec<u64>>, Vec<u64>>> {
        if boundaries.len() % 2 != 0 {
            log::warn!(
                "approximate_sizes got {} boundaries; ignoring the trailing one",
                boundaries.len()
            );
        }
        let ranges: Vec<(Bytes, Bytes)> = boundaries
            .chunks_exact(2)
            .filter_map(|pair| match (to_engine_bytes(&pair[0]), to_engine_bytes(&pair[1])) {
                (Ok(start), Ok(limit)) => Some((start, limit)),
                _ => {
                    log::debug!(
                        "Skipping malformed range ({}, {})",
                        pair[0].type_name(),
                        pair[1].type_name()
                    );
                    None
                }
            })
            .collect();
        let engine = self.inner.engine()?;

        Ok(Operation::new(
            "approximate_sizes",
            move || engine.approximate_sizes(&ranges),
            |sizes| Ok(sizes?),
        )
        .owned_by(self.resource()))
    }

    /// Approximate stored bytes for each `[start, limit)` pair in a flat
    /// boundary list. Malformed pairs are skipped.
    pub fn approximate_sizes(&self, boundaries: &[HostValue]) -> Result<Vec<u64>> {
        self.sizes_op(boundaries)?.run_sync()
    }

    pub fn approximate_sizes_async<F>(&self, boundaries: &[HostValue], callback: F) -> Result<()>
    where
        F: FnOnce(Result<Vec<u64>>) + 'static,
    {
        self.sizes_op(boundaries)?
            .run_async(self.event_loop(), callback)
    }

    /// Not supported by the bundled engine. Bounds are still checked:
    /// each must be a string, a buffer, or nullish for an open end.
    pub fn compact_range(&self, start: impl Into<HostValue>, limit: impl Into<HostValue>) -> Result<()> {
        for bound in [start.into(), limit.into()] {
            if !bound.is_nullish() {
                to_engine_bytes(&bound)?;
            }
        }
        Err(Error::NotImplemented("compact_range"))
    }

    // -- maintenance -----------------------------------------------------

    fn maintenance_op(ctx: &Context, task: Maintenance, path: &Path, options: Options) -> Result<Operation<EngineResult<()>, ()>> {
        let path = check_path(path)?;
        let backend = ctx.backend().clone();
        let label = match task {
            Maintenance::Destroy => "destroy",
            Maintenance::Repair => "repair",
        };
        Ok(Operation::new(
            label,
            move || match task {
                Maintenance::Destroy => backend.destroy(&path, &options),
                Maintenance::Repair => backend.repair(&path, &options),
            },
            |done| Ok(done?),
        ))
    }

    /// Remove the database at `path`. It must not be open.
    pub fn destroy(ctx: &Context, path: impl AsRef<Path>, options: Options) -> Result<()> {
        Self::maintenance_op(ctx, Maintenance::Destroy, path.as_ref(), options)?.run_sync()
    }

    pub fn destroy_async<F>(ctx: &Context, path: impl AsRef<Path>, options: Options, callback: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + 'static,
    {
        Self::maintenance_op(ctx, Maintenance::Destroy, path.as_ref(), options)?
            .run_async(ctx.event_loop(), callback)
    }

    /// Salvage what can be recovered of a damaged database at `path`.
    pub fn repair(ctx: &Context, path: impl AsRef<Path>, options: Options) -> Result<()> {
        Self::maintenance_op(ctx, Maintenance::Repair, path.as_ref(), options)?.run_sync()
    }

    pub fn repair_async<F>(ctx: &Context, path: impl AsRef<Path>, options: Options, callback: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + 'static,
    {
        Self::maintenance_op(ctx, Maintenance::Repair, path.as_ref(), options)?
            .run_async(ctx.event_loop(), callback)
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("location", &self.inner.location.borrow())
            .field("open", &self.is_open())
            .field("iterators", &self.live_iterators())
            .field("snapshots", &self.live_snapshots())
            .finish()
    }
}
