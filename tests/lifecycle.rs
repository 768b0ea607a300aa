//! LEVEE - Lifecycle Tests
//! Close ordering, finalization and reopen behavior of databases and their
//! dependent iterators and snapshots.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use levee::engine::{Backend, Cursor, DiskBackend, Engine, ReadView, Store};
use levee::error::EngineResult;
use levee::types::{Key, SnapshotToken, Value, WriteBatch};
use levee::{Context, Database, Error, HostValue, Options, ReadOptions, Result, RuntimeConfig, WriteOptions};

/// Disk backend that counts how many engines it has opened and closed.
#[derive(Default)]
struct CountingBackend {
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

struct CountingEngine {
    store: Store,
    closed: Arc<AtomicUsize>,
}

impl Engine for CountingEngine {
    fn get(&self, view: &ReadView, key: &[u8]) -> EngineResult<Option<Value>> {
        self.store.get(view, key)
    }

    fn write(&self, options: &WriteOptions, batch: &WriteBatch) -> EngineResult<()> {
        self.store.write(options, batch)
    }

    fn new_cursor(&self, view: &ReadView) -> EngineResult<Box<dyn Cursor>> {
        self.store.new_cursor(view)
    }

    fn snapshot(&self) -> EngineResult<SnapshotToken> {
        self.store.snapshot()
    }

    fn release_snapshot(&self, token: SnapshotToken) {
        self.store.release_snapshot(token)
    }

    fn property(&self, name: &str) -> Option<String> {
        self.store.property(name)
    }

    fn approximate_sizes(&self, ranges: &[(Key, Key)]) -> EngineResult<Vec<u64>> {
        self.store.approximate_sizes(ranges)
    }

    fn close(&self) -> EngineResult<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.store.close()
    }
}

impl Backend for CountingBackend {
    fn open(&self, path: &Path, options: &Options) -> EngineResult<Arc<dyn Engine>> {
        let store = Store::open(path, options)?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(CountingEngine {
            store,
            closed: self.closed.clone(),
        }))
    }

    fn destroy(&self, path: &Path, options: &Options) -> EngineResult<()> {
        DiskBackend.destroy(path, options)
    }

    fn repair(&self, path: &Path, options: &Options) -> EngineResult<()> {
        DiskBackend.repair(path, options)
    }
}

fn counting_context() -> (Context, Arc<CountingBackend>) {
    let backend = Arc::new(CountingBackend::default());
    let ctx = Context::with_backend(RuntimeConfig::default().with_worker_threads(2), backend.clone()).unwrap();
    (ctx, backend)
}

fn create() -> Options {
    Options::default().with_create_if_missing(true)
}

fn closes(backend: &CountingBackend) -> usize {
    backend.closed.load(Ordering::SeqCst)
}

#[test]
fn test_double_close_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, backend) = counting_context();
    let db = Database::open(&ctx, dir.path(), create()).unwrap();

    db.close().unwrap();
    db.close().unwrap();
    assert!(!db.is_open());
    assert_eq!(closes(&backend), 1);

    let results = Rc::new(RefCell::new(Vec::new()));
    for _ in 0..2 {
        let sink = results.clone();
        db.close_async(move |r: Result<()>| sink.borrow_mut().push(r.is_ok()))
            .unwrap();
    }
    ctx.run().unwrap();
    assert_eq!(*results.borrow(), vec![true, true]);
    assert_eq!(closes(&backend), 1);
}

#[test]
fn test_overlapping_async_closes_close_engine_once() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, backend) = counting_context();
    let db = Database::open(&ctx, dir.path(), create()).unwrap();

    let done = Rc::new(RefCell::new(0));
    for _ in 0..2 {
        let done = done.clone();
        db.close_async(move |r| {
            r.unwrap();
            *done.borrow_mut() += 1;
        })
        .unwrap();
    }
    ctx.run().unwrap();
    assert_eq!(*done.borrow(), 2);
    assert_eq!(closes(&backend), 1);
}

#[test]
fn test_close_neutralizes_iterators_and_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, _backend) = counting_context();
    let db = Database::open(&ctx, dir.path(), create()).unwrap();
    db.put("a", "1", WriteOptions::default()).unwrap();

    let it = db.iterator(ReadOptions::default()).unwrap();
    let snapshot = db.snapshot().unwrap();
    assert!(it.first().unwrap());
    assert_eq!(db.live_iterators(), 1);
    assert_eq!(db.live_snapshots(), 1);

    db.close().unwrap();
    assert!(it.is_closed());
    assert!(snapshot.is_released());
    assert_eq!(db.live_iterators(), 0);
    assert_eq!(db.live_snapshots(), 0);

    assert!(it.first().unwrap_err().is_illegal_state());
    assert!(it.key().unwrap_err().is_illegal_state());
    assert!(it.next_async(|_| panic!("closed iterator")).unwrap_err().is_illegal_state());
    assert!(db.get("a", ReadOptions::default()).unwrap_err().is_illegal_state());

    // Releasing after the handle already did is a no-op.
    snapshot.release();
    it.close();
}

#[test]
fn test_close_while_iterator_op_in_flight() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, backend) = counting_context();
    let db = Database::open(&ctx, dir.path(), create()).unwrap();
    db.put("a", "1", WriteOptions::default()).unwrap();

    let it = db.iterator(ReadOptions::default()).unwrap();
    let moved = Rc::new(RefCell::new(None));
    let sink = moved.clone();
    it.first_async(move |r| *sink.borrow_mut() = Some(r)).unwrap();
    db.close().unwrap();
    ctx.run().unwrap();

    // Whatever the in-flight step saw, the iterator is closed afterwards.
    assert!(moved.borrow().is_some());
    assert!(it.is_closed());
    assert!(it.first().unwrap_err().is_illegal_state());
    assert_eq!(closes(&backend), 1);
}

#[test]
fn test_iterator_outlives_dropped_database_proxy() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, backend) = counting_context();
    let db = Database::open(&ctx, dir.path(), create()).unwrap();
    db.put("a", "1", WriteOptions::default()).unwrap();
    db.put("b", "2", WriteOptions::default()).unwrap();

    let it = db.iterator(ReadOptions::default()).unwrap();
    let snapshot = db.snapshot().unwrap();
    drop(db);

    // The iterator keeps the handle, and with it the engine, alive.
    assert_eq!(closes(&backend), 0);
    assert!(it.first().unwrap());
    assert!(it.next().unwrap());
    assert_eq!(it.key().unwrap().unwrap().as_text(), Some("b"));

    drop(it);
    assert_eq!(closes(&backend), 0);
    drop(snapshot);
    assert_eq!(closes(&backend), 1);
}

#[test]
fn test_dropping_everything_finalizes_once() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, backend) = counting_context();
    {
        let db = Database::open(&ctx, dir.path(), create()).unwrap();
        let _it = db.iterator(ReadOptions::default()).unwrap();
        let _snapshot = db.snapshot().unwrap();
        let _alias = db.clone();
    }
    assert_eq!(closes(&backend), 1);

    // An explicitly closed handle is not closed again on finalization.
    {
        let db = Database::open(&ctx, dir.path(), create()).unwrap();
        db.close().unwrap();
    }
    assert_eq!(closes(&backend), 2);
    assert_eq!(backend.opened.load(Ordering::SeqCst), 2);
}

#[test]
fn test_dropped_iterator_leaves_registry() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, _backend) = counting_context();
    let db = Database::open(&ctx, dir.path(), create()).unwrap();

    let first = db.iterator(ReadOptions::default()).unwrap();
    let second = db.iterator(ReadOptions::default()).unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(db.live_iterators(), 2);

    drop(first);
    assert_eq!(db.live_iterators(), 1);
    second.close();
    second.close();
    assert_eq!(db.live_iterators(), 0);
}

#[test]
fn test_reopen_invalidates_dependents() {
    let (a, b) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
    let (ctx, backend) = counting_context();
    let db = Database::open(&ctx, a.path(), create()).unwrap();
    db.put("where", "a", WriteOptions::default()).unwrap();

    let it = db.iterator(ReadOptions::default()).unwrap();
    let snapshot = db.snapshot().unwrap();

    db.reopen(b.path(), create()).unwrap();
    assert!(db.is_open());
    assert_eq!(db.location().as_deref(), Some(b.path()));
    assert_eq!(closes(&backend), 1);
    assert!(it.is_closed());
    assert!(snapshot.is_released());
    assert!(db.get("where", ReadOptions::default()).unwrap().is_none());

    let err = db
        .get("where", ReadOptions::default().with_snapshot(&snapshot))
        .unwrap_err();
    assert!(err.is_illegal_state());
}

#[test]
fn test_reopen_async_reports_failure_and_stays_closed() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, _backend) = counting_context();
    let db = Database::open(&ctx, dir.path(), create()).unwrap();

    let outcome = Rc::new(RefCell::new(None));
    let sink = outcome.clone();
    db.reopen_async(dir.path().join("nowhere"), Options::default(), move |r| {
        *sink.borrow_mut() = Some(r)
    })
    .unwrap();
    ctx.run().unwrap();

    let result = outcome.borrow_mut().take().unwrap();
    assert!(matches!(result, Err(Error::Engine(_))));
    assert!(!db.is_open());
    assert!(matches!(db.reopen("", create()), Err(Error::InvalidArgument(_))));
}

#[test]
fn test_unopened_handle() {
    let (ctx, _backend) = counting_context();
    let db = Database::new(&ctx);
    assert!(!db.is_open());
    assert!(db.location().is_none());
    assert!(db.get("k", ReadOptions::default()).unwrap_err().is_illegal_state());
    assert!(db.iterator(ReadOptions::default()).unwrap_err().is_illegal_state());
    db.close().unwrap();
}

#[test]
fn test_compact_range_not_implemented() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, _backend) = counting_context();
    let db = Database::open(&ctx, dir.path(), create()).unwrap();
    assert!(matches!(db.compact_range("a", "z"), Err(Error::NotImplemented(_))));
    assert!(matches!(
        db.compact_range(HostValue::Null, HostValue::Undefined),
        Err(Error::NotImplemented(_))
    ));
    assert!(matches!(
        db.compact_range(HostValue::Number(1.0), "z"),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn test_close_submitted_during_open_wins() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, backend) = counting_context();
    let db = Database::new(&ctx);

    let opened = Rc::new(RefCell::new(None));
    let closed = Rc::new(RefCell::new(None));
    let (open_sink, close_sink) = (opened.clone(), closed.clone());
    db.reopen_async(dir.path(), create(), move |r| *open_sink.borrow_mut() = Some(r))
        .unwrap();
    db.close_async(move |r| *close_sink.borrow_mut() = Some(r)).unwrap();
    ctx.run().unwrap();

    assert!(opened.borrow_mut().take().unwrap().unwrap_err().is_illegal_state());
    assert!(closed.borrow_mut().take().unwrap().is_ok());
    assert!(!db.is_open());
    assert!(db.location().is_none());
    assert_eq!(backend.opened.load(Ordering::SeqCst), 1);
    assert_eq!(closes(&backend), 1);

    db.reopen(dir.path(), create()).unwrap();
    assert!(db.is_open());
}

#[test]
fn test_later_reopen_supersedes_earlier() {
    let (a, b) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
    let (ctx, backend) = counting_context();
    let db = Database::new(&ctx);

    let results = Rc::new(RefCell::new(Vec::new()));
    for dir in [a.path(), b.path()] {
        let sink = results.clone();
        db.reopen_async(dir, create(), move |r: Result<()>| {
            sink.borrow_mut().push(r.map_err(|e| e.is_illegal_state()))
        })
        .unwrap();
    }
    ctx.run().unwrap();

    let mut results = results.borrow().clone();
    results.sort();
    assert_eq!(results, vec![Ok(()), Err(true)]);
    assert_eq!(db.location().as_deref(), Some(b.path()));
    assert_eq!(closes(&backend), 1);
}
