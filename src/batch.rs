//! LEVEE - Write Batch
//! Host-side builder for an atomic group of puts and deletes. The ops are
//! held in an `Arc<WriteBatch>` so a write can ship them to a worker without
//! copying; while any write holds the batch it is pinned and refuses
//! mutation.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::config::WriteOptions;
use crate::database::Database;
use crate::error::{Error, Result};
use crate::host::payload::to_engine_bytes;
use crate::host::HostValue;
use crate::types::WriteBatch;

struct BatchInner {
    ops: RefCell<Arc<WriteBatch>>,
    pins: Cell<usize>,
    db: Option<Database>,
}

#[derive(Clone)]
pub struct Batch {
    inner: Rc<BatchInner>,
}

/// Marks a batch as held by a write until dropped.
pub(crate) struct BatchPin {
    inner: Rc<BatchInner>,
    ops: Arc<WriteBatch>,
    clear_on_commit: bool,
}

impl BatchPin {
    pub(crate) fn ops(&self) -> Arc<WriteBatch> {
        self.ops.clone()
    }

    /// The write landed: unpin, and empty the batch if asked to.
    pub(crate) fn committed(self) {
        let inner = self.inner.clone();
        let clear = self.clear_on_commit;
        drop(self);
        if clear && inner.pins.get() == 0 {
            inner.ops.replace(Arc::new(WriteBatch::new()));
        }
    }
}

impl Drop for BatchPin {
    fn drop(&mut self) {
        self.inner.pins.set(self.inner.pins.get().saturating_sub(1));
    }
}

impl Batch {
    /// A free-standing batch, written with `Database::write`.
    pub fn new() -> Self {
        Self::with_db(None)
    }

    pub(crate) fn bound(db: Database) -> Self {
        Self::with_db(Some(db))
    }

    fn with_db(db: Option<Database>) -> Self {
        Self {
            inner: Rc::new(BatchInner {
                ops: RefCell::new(Arc::new(WriteBatch::new())),
                pins: Cell::new(0),
                db,
            }),
        }
    }

    /// Build a batch from a host array of `{ type, key, value }` objects,
    /// where `type` is `"put"` or `"del"`.
    pub fn from_host(value: &HostValue) -> Result<Self> {
        let HostValue::Array(items) = value else {
            return Err(Error::invalid(format!(
                "batch must be an array, got {}",
                value.type_name()
            )));
        };
        let batch = Batch::new();
        for item in items {
            let HostValue::Object(op) = item else {
                return Err(Error::invalid("batch entries must be objects"));
            };
            match op.get("type") {
                HostValue::Str(kind) if kind == "put" => batch.put(op.get("key").clone(), op.get("value").clone())?,
                HostValue::Str(kind) if kind == "del" => batch.del(op.get("key").clone())?,
                other => {
                    return Err(Error::invalid(format!(
                        "batch entry type must be \"put\" or \"del\", got {}",
                        other.type_name()
                    )))
                }
            }
        }
        Ok(batch)
    }

    fn mutate(&self, f: impl FnOnce(&mut WriteBatch)) -> Result<()> {
        if self.inner.pins.get() > 0 {
            return Err(Error::illegal("batch is being written"));
        }
        let mut ops = self.inner.ops.borrow_mut();
        f(Arc::make_mut(&mut ops));
        Ok(())
    }

    pub fn put(&self, key: impl Into<HostValue>, value: impl Into<HostValue>) -> Result<()> {
        let key = to_engine_bytes(&key.into())?;
        let value = to_engine_bytes(&value.into())?;
        self.mutate(|batch| batch.put(key, value))
    }

    pub fn del(&self, key: impl Into<HostValue>) -> Result<()> {
        let key = to_engine_bytes(&key.into())?;
        self.mutate(|batch| batch.delete(key))
    }

    pub fn clear(&self) -> Result<()> {
        self.mutate(WriteBatch::clear)
    }

    pub fn len(&self) -> usize {
        self.inner.ops.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.ops.borrow().is_empty()
    }

    pub fn is_pinned(&self) -> bool {
        self.inner.pins.get() > 0
    }

    pub(crate) fn pin(&self, clear_on_commit: bool) -> BatchPin {
        self.inner.pins.set(self.inner.pins.get() + 1);
        BatchPin {
            inner: self.inner.clone(),
            ops: self.inner.ops.borrow().clone(),
            clear_on_commit,
        }
    }

    fn db(&self) -> Result<&Database> {
        self.inner
            .db
            .as_ref()
            .ok_or_else(|| Error::illegal("batch is not bound to a database"))
    }

    /// Commit through the database this batch came from, then clear it.
    pub fn write(&self, options: WriteOptions) -> Result<()> {
        let db = self.db()?;
        let pin = self.pin(true);
        db.commit_op("batch.write", pin.ops(), options, Some(pin))?
            .run_sync()
    }

    pub fn write_async<F>(&self, options: WriteOptions, callback: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + 'static,
    {
        let db = self.db()?;
        let pin = self.pin(true);
        db.commit_op("batch.write", pin.ops(), options, Some(pin))?
            .run_async(db.handle().event_loop(), callback)
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("ops", &self.len())
            .field("pinned", &self.is_pinned())
            .field("bound", &self.inner.db.is_some())
            .finish()
    }
}
