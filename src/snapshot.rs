//! LEVEE - Snapshot Resource
//! A pinned point-in-time view, consumed only through `ReadOptions`.
//! The token is released exactly once: by `release()`, by the owning handle
//! when it closes, or when the last proxy for it is dropped. A read that is
//! already in flight through the snapshot holds a `SnapshotUse`, and the
//! token stays pinned in the engine until that read has landed.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::database::HandleInner;
use crate::error::{Error, Result};
use crate::registry::ResourceId;
use crate::types::SnapshotToken;

pub(crate) struct SnapshotCore {
    id: ResourceId,
    token: SnapshotToken,
    /// Handle generation the token was issued under.
    generation: u64,
    /// Release requested; no new reads may start.
    released: Cell<bool>,
    /// Token handed back to the engine.
    returned: Cell<bool>,
    uses: Cell<usize>,
    handle: Rc<HandleInner>,
}

impl SnapshotCore {
    /// Refuse new reads, and hand the token back to the engine once no read
    /// is using it.
    pub(crate) fn release_token(&self) {
        if !self.released.replace(true) {
            log::trace!("Snapshot {} released", self.id);
        }
        if self.uses.get() == 0 {
            self.return_token();
        }
    }

    fn return_token(&self) {
        if self.returned.replace(true) {
            return;
        }
        // A token from an engine that has since been closed or replaced
        // died with that engine.
        if self.handle.generation() != self.generation {
            return;
        }
        if let Some(engine) = self.handle.current_engine() {
            engine.release_snapshot(self.token);
        }
    }
}

impl Drop for SnapshotCore {
    fn drop(&mut self) {
        self.release_token();
        self.handle.snapshots.borrow_mut().remove(self.id);
    }
}

/// Keeps a snapshot's token pinned while a read through it is in flight.
pub(crate) struct SnapshotUse {
    core: Rc<SnapshotCore>,
}

impl Drop for SnapshotUse {
    fn drop(&mut self) {
        let core = &self.core;
        core.uses.set(core.uses.get().saturating_sub(1));
        if core.released.get() && core.uses.get() == 0 {
            log::trace!("Snapshot {} returned after its last in-flight read", core.id);
            core.return_token();
        }
    }
}

/// Host-visible proxy for a snapshot. Clones share the same token.
#[derive(Clone)]
pub struct Snapshot {
    core: Rc<SnapshotCore>,
}

impl Snapshot {
    pub(crate) fn register(handle: Rc<HandleInner>, token: SnapshotToken) -> Self {
        let id = handle.snapshots.borrow_mut().allocate();
        let core = Rc::new(SnapshotCore {
            id,
            token,
            generation: handle.generation(),
            released: Cell::new(false),
            returned: Cell::new(false),
            uses: Cell::new(0),
            handle,
        });
        core.handle.snapshots.borrow_mut().insert(id, &core);
        log::trace!("Snapshot {} taken at sequence {}", id, token.sequence());
        Self { core }
    }

    pub fn id(&self) -> ResourceId {
        self.core.id
    }

    /// Sequence number the view is pinned at.
    pub fn sequence(&self) -> u64 {
        self.core.token.sequence()
    }

    pub fn is_released(&self) -> bool {
        self.core.released.get()
    }

    /// Release the view. Idempotent.
    pub fn release(&self) {
        self.core.release_token();
        self.core.handle.snapshots.borrow_mut().remove(self.core.id);
    }

    /// The token, if this snapshot may be used for reads on `handle`,
    /// together with a use that keeps it pinned until dropped.
    pub(crate) fn claim_for(&self, handle: &Rc<HandleInner>) -> Result<(SnapshotToken, SnapshotUse)> {
        if !Rc::ptr_eq(&self.core.handle, handle) {
            return Err(Error::invalid("snapshot belongs to a different database"));
        }
        if self.is_released() {
            return Err(Error::illegal("snapshot has been released"));
        }
        self.core.uses.set(self.core.uses.get() + 1);
        let claim = SnapshotUse {
            core: self.core.clone(),
        };
        Ok((self.core.token, claim))
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("id", &self.core.id)
            .field("sequence", &self.sequence())
            .field("released", &self.is_released())
            .finish()
    }
}
