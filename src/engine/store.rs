//! LEVEE - Bundled Storage Engine
//! A durable key-value store: writes go to the WAL first, then into the
//! multi-version MemTable. Snapshots and cursors pin sequence numbers so
//! their view stays stable while newer batches land.
//!
//! ## Concurrency Model
//! - Readers (`get`, cursors, properties) take the state **read lock**
//! - Writers serialize on the WAL mutex, then take the state **write lock**
//!   once to apply a whole batch, so no partial batch is ever observable
//! - Lock order is always WAL, then state

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::config::{Options, WriteOptions};
use crate::error::{EngineError, EngineResult};
use crate::types::{BatchOp, Key, SnapshotToken, Value, WriteBatch};

use super::cursor::StoreCursor;
use super::memtable::MemTable;
use super::metrics::EngineMetrics;
use super::wal::{WalRecord, WriteAheadLog};
use super::{Backend, Cursor, Engine, ReadView};

const WAL_FILE: &str = "levee.wal";
const WAL_TMP_FILE: &str = "levee.wal.tmp";
const IDENTITY_FILE: &str = "IDENTITY";
const FORMAT_VERSION: u32 = 1;

/// Persisted at the root of every database directory.
#[derive(Debug, Serialize, Deserialize)]
struct Identity {
    format_version: u32,
    comparator: String,
}

/// Mutable engine state guarded by the state lock.
pub(super) struct State {
    pub(super) table: MemTable,
    pub(super) last_seq: u64,
    /// Pinned sequence numbers (snapshots and cursors) with pin counts.
    pins: BTreeMap<u64, usize>,
    bytes_since_checkpoint: usize,
}

impl State {
    pub(super) fn pin(&mut self, seq: u64) {
        *self.pins.entry(seq).or_insert(0) += 1;
    }

    pub(super) fn unpin(&mut self, seq: u64) -> bool {
        match self.pins.get_mut(&seq) {
            Some(count) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                self.pins.remove(&seq);
                true
            }
            None => false,
        }
    }

    /// Oldest sequence any reader can still observe.
    fn horizon(&self) -> u64 {
        self.pins
            .keys()
            .next()
            .copied()
            .unwrap_or(self.last_seq)
            .min(self.last_seq)
    }

    fn live_pins(&self) -> usize {
        self.pins.values().sum()
    }
}

/// State shared between the store and the cursors it hands out.
pub(super) struct Shared {
    dir: PathBuf,
    options: Options,
    pub(super) state: RwLock<State>,
    wal: Mutex<WriteAheadLog>,
    pub(super) metrics: EngineMetrics,
    closed: AtomicBool,
}

impl Shared {
    pub(super) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> EngineResult<()> {
        if self.is_closed() {
            Err(EngineError::Closed)
        } else {
            Ok(())
        }
    }

    fn read_seq(&self, view: &ReadView, state: &State) -> u64 {
        view.snapshot
            .map(SnapshotToken::sequence)
            .unwrap_or(state.last_seq)
    }
}

/// The bundled engine.
pub struct Store {
    shared: Arc<Shared>,
}

/// Rebuild a MemTable from logged batches. Returns the table and the
/// highest sequence seen.
fn replay(records: &[WalRecord]) -> (MemTable, u64) {
    let mut table = MemTable::new();
    let mut last_seq = 0;
    for record in records {
        for op in &record.ops {
            match op {
                BatchOp::Put { key, value } => table.insert(key.clone(), record.seq, value.clone()),
                BatchOp::Delete { key } => table.delete(key.clone(), record.seq),
            }
        }
        last_seq = last_seq.max(record.seq);
    }
    table.prune_all(last_seq);
    (table, last_seq)
}

fn checkpoint_record(table: &MemTable, seq: u64) -> WalRecord {
    let ops = table
        .live_entries(seq)
        .into_iter()
        .map(|(key, value)| BatchOp::Put { key, value })
        .collect();
    WalRecord { seq, ops }
}

fn read_identity(dir: &Path) -> EngineResult<Option<Identity>> {
    match fs::read(dir.join(IDENTITY_FILE)) {
        Ok(data) => Ok(Some(bincode::deserialize(&data)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_identity(dir: &Path, comparator: &str) -> EngineResult<()> {
    let identity = Identity {
        format_version: FORMAT_VERSION,
        comparator: comparator.to_string(),
    };
    fs::write(dir.join(IDENTITY_FILE), bincode::serialize(&identity)?)?;
    Ok(())
}

fn remove_if_present(path: &Path) -> EngineResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl Store {
    /// Open or create a store at `path`.
    pub fn open(path: &Path, options: &Options) -> EngineResult<Self> {
        let exists = path.join(IDENTITY_FILE).exists() || path.join(WAL_FILE).exists();
        if !exists {
            if !options.create_if_missing {
                return Err(EngineError::InvalidArgument(format!(
                    "{}: does not exist (create_if_missing is false)",
                    path.display()
                )));
            }
            fs::create_dir_all(path)?;
        } else if options.error_if_exists {
            return Err(EngineError::InvalidArgument(format!(
                "{}: exists (error_if_exists is true)",
                path.display()
            )));
        }

        match read_identity(path)? {
            Some(identity) if identity.format_version != FORMAT_VERSION => {
                return Err(EngineError::Corruption(format!(
                    "unsupported format version {}",
                    identity.format_version
                )));
            }
            Some(identity) if identity.comparator != options.comparator => {
                return Err(EngineError::InvalidArgument(format!(
                    "{} does not match existing comparator {}",
                    options.comparator, identity.comparator
                )));
            }
            Some(_) => {}
            None => write_identity(path, &options.comparator)?,
        }

        let wal_path = path.join(WAL_FILE);
        let recovered = WriteAheadLog::recover(&wal_path)?;
        if let Some(damage) = &recovered.damage {
            if options.paranoid_checks {
                return Err(EngineError::Corruption(damage.clone()));
            }
            log::warn!("Dropping damaged WAL tail in {:?}: {}", path, damage);
            WriteAheadLog::truncate_to(&wal_path, recovered.valid_len)?;
        }

        let (table, last_seq) = replay(&recovered.records);
        let metrics = EngineMetrics::new();
        metrics.record_replay(recovered.records.len());
        let wal = WriteAheadLog::open(wal_path)?;

        log::info!(
            "Store opened at {:?} ({} records replayed, sequence {})",
            path,
            recovered.records.len(),
            last_seq
        );

        Ok(Self {
            shared: Arc::new(Shared {
                dir: path.to_path_buf(),
                options: options.clone(),
                state: RwLock::new(State {
                    table,
                    last_seq,
                    pins: BTreeMap::new(),
                    bytes_since_checkpoint: 0,
                }),
                wal: Mutex::new(wal),
                metrics,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Remove every file of the database at `path`, then the directory
    /// itself if nothing else lives there. A missing directory is fine.
    pub fn destroy(path: &Path) -> EngineResult<()> {
        if !path.exists() {
            return Ok(());
        }
        for name in [WAL_FILE, WAL_TMP_FILE, IDENTITY_FILE] {
            remove_if_present(&path.join(name))?;
        }
        if let Err(e) = fs::remove_dir(path) {
            log::debug!("Leaving {:?} in place: {}", path, e);
        }
        log::info!("Destroyed database at {:?}", path);
        Ok(())
    }

    /// Salvage every intact WAL frame and rewrite the log from it.
    pub fn repair(path: &Path, options: &Options) -> EngineResult<()> {
        if !path.is_dir() {
            return Err(EngineError::InvalidArgument(format!(
                "{}: does not exist",
                path.display()
            )));
        }
        let wal_path = path.join(WAL_FILE);
        let recovered = WriteAheadLog::recover(&wal_path)?;
        let (table, last_seq) = replay(&recovered.records);

        let mut wal = WriteAheadLog::open(wal_path)?;
        wal.rewrite(&checkpoint_record(&table, last_seq))?;
        if read_identity(path)?.is_none() {
            write_identity(path, &options.comparator)?;
        }

        log::info!(
            "Repaired {:?}: kept {} records ({} live keys), damage: {}",
            path,
            recovered.records.len(),
            table.live_len(last_seq),
            recovered.damage.as_deref().unwrap_or("none")
        );
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.shared.dir
    }
}

impl Engine for Store {
    fn get(&self, view: &ReadView, key: &[u8]) -> EngineResult<Option<Value>> {
        self.shared.ensure_open()?;
        let state = self.shared.state.read();
        let seq = self.shared.read_seq(view, &state);
        let value = state.table.get(key, seq).cloned();
        self.shared.metrics.record_get(value.as_ref().map(|v| v.len()));
        Ok(value)
    }

    fn write(&self, options: &WriteOptions, batch: &WriteBatch) -> EngineResult<()> {
        self.shared.ensure_open()?;
        if batch.is_empty() {
            return Ok(());
        }

        let mut wal = self.shared.wal.lock();
        // Writers are serialized by the WAL lock, so last_seq is stable here.
        let seq = self.shared.state.read().last_seq + 1;
        let record = WalRecord {
            seq,
            ops: batch.ops().to_vec(),
        };
        let logged = wal.append(&record, options.sync)?;

        let mut state = self.shared.state.write();
        let (mut puts, mut deletes) = (0, 0);
        for op in record.ops {
            match op {
                BatchOp::Put { key, value } => {
                    puts += 1;
                    state.table.insert(key, seq, value);
                }
                BatchOp::Delete { key } => {
                    deletes += 1;
                    state.table.delete(key, seq);
                }
            }
        }
        state.last_seq = seq;

        let horizon = state.horizon();
        for op in batch.ops() {
            state.table.prune(op.key(), horizon);
        }
        self.shared.metrics.record_write(puts, deletes, batch.size());

        state.bytes_since_checkpoint += logged;
        if state.bytes_since_checkpoint > self.shared.options.write_buffer_size {
            let checkpoint = checkpoint_record(&state.table, seq);
            wal.rewrite(&checkpoint)?;
            state.bytes_since_checkpoint = 0;
            self.shared.metrics.record_checkpoint();
            log::debug!(
                "WAL checkpoint at sequence {} ({} live entries)",
                seq,
                checkpoint.ops.len()
            );
        }
        Ok(())
    }

    fn new_cursor(&self, view: &ReadView) -> EngineResult<Box<dyn Cursor>> {
        self.shared.ensure_open()?;
        let seq = {
            let mut state = self.shared.state.write();
            let seq = self.shared.read_seq(view, &state);
            state.pin(seq);
            seq
        };
        Ok(Box::new(StoreCursor::new(self.shared.clone(), seq)))
    }

    fn snapshot(&self) -> EngineResult<SnapshotToken> {
        self.shared.ensure_open()?;
        let mut state = self.shared.state.write();
        let seq = state.last_seq;
        state.pin(seq);
        self.shared.metrics.record_snapshot();
        Ok(SnapshotToken(seq))
    }

    fn release_snapshot(&self, token: SnapshotToken) {
        if !self.shared.state.write().unpin(token.sequence()) {
            log::debug!("Release of unknown snapshot {:?} ignored", token);
        }
    }

    fn property(&self, name: &str) -> Option<String> {
        if self.shared.is_closed() {
            return None;
        }
        let state = self.shared.state.read();
        match name {
            "levee.stats" => Some(self.shared.metrics.report()),
            "levee.num-entries" => Some(state.table.live_len(state.last_seq).to_string()),
            "levee.sequence" => Some(state.last_seq.to_string()),
            "levee.approximate-memory-usage" => Some(state.table.size().to_string()),
            "levee.live-snapshots" => Some(state.live_pins().to_string()),
            _ => None,
        }
    }

    fn approximate_sizes(&self, ranges: &[(Key, Key)]) -> EngineResult<Vec<u64>> {
        self.shared.ensure_open()?;
        let state = self.shared.state.read();
        Ok(ranges
            .iter()
            .map(|(start, limit)| state.table.range_size(start, limit, state.last_seq))
            .collect())
    }

    fn close(&self) -> EngineResult<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shared.wal.lock().sync()?;
        log::info!("Store closed at {:?}", self.shared.dir);
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("Failed to close store at {:?}: {}", self.shared.dir, e);
        }
    }
}

/// Backend that opens [`Store`] instances on the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskBackend;

impl Backend for DiskBackend {
    fn open(&self, path: &Path, options: &Options) -> EngineResult<Arc<dyn Engine>> {
        Ok(Arc::new(Store::open(path, options)?))
    }

    fn destroy(&self, path: &Path, _options: &Options) -> EngineResult<()> {
        Store::destroy(path)
    }

    fn repair(&self, path: &Path, options: &Options) -> EngineResult<()> {
        Store::repair(path, options)
    }
}
