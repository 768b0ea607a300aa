//! LEVEE - Operation Template
//! A single-use unit of work with two phases:
//!
//! - **exec**: pure native work on data already copied out of host memory.
//!   It is `Send` and may run on a worker thread.
//! - **conv**: turns the native outcome into a host-visible result. It
//!   always runs on the event-loop thread and may touch host proxies.
//!
//! Without a callback the operation runs both phases inline and returns the
//! result. With one, exec goes to the worker pool and conv plus the callback
//! run when the loop delivers the completion.
//!
//! ## Lifecycle
//! `Created → Running → Converting → Delivered`
//!
//! The owning resource is acquired before anything runs (a failing
//! precondition never reaches the pool) and released before the result is
//! delivered, on every path. The operation keeps its owner alive until it is
//! dropped after delivery.

use std::rc::Rc;

use crate::error::{Error, Result};

use super::EventLoop;

/// The phase an operation has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    Running,
    Converting,
    Delivered,
}

/// Something an operation runs against: a database handle or an iterator.
pub trait Resource {
    /// Check preconditions and claim the resource for one operation.
    fn acquire(&self) -> Result<()>;

    /// Give the claim back. Called exactly once per successful `acquire`.
    fn release(&self);
}

/// Holds an acquired owner; releases it on drop unless already released.
struct Claim {
    owner: Option<Rc<dyn Resource>>,
    released: bool,
}

impl Claim {
    fn acquire(owner: Option<Rc<dyn Resource>>) -> Result<Self> {
        if let Some(owner) = &owner {
            owner.acquire()?;
        }
        Ok(Self {
            owner,
            released: false,
        })
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            if let Some(owner) = &self.owner {
                owner.release();
            }
        }
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.release();
    }
}

type Exec<O> = Box<dyn FnOnce() -> O + Send>;
type Conv<O, T> = Box<dyn FnOnce(O) -> Result<T>>;

pub struct Operation<O, T> {
    label: &'static str,
    owner: Option<Rc<dyn Resource>>,
    exec: Exec<O>,
    conv: Conv<O, T>,
}

fn trace(label: &str, phase: Phase) {
    log::trace!("{} -> {:?}", label, phase);
}

impl<O: Send + 'static, T: 'static> Operation<O, T> {
    pub fn new<E, C>(label: &'static str, exec: E, conv: C) -> Self
    where
        E: FnOnce() -> O + Send + 'static,
        C: FnOnce(O) -> Result<T> + 'static,
    {
        trace(label, Phase::Created);
        Self {
            label,
            owner: None,
            exec: Box::new(exec),
            conv: Box::new(conv),
        }
    }

    /// Tie the operation to a resource it keeps alive and claims.
    pub fn owned_by(mut self, owner: Rc<dyn Resource>) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Run both phases on the calling thread.
    pub fn run_sync(self) -> Result<T> {
        let Operation {
            label,
            owner,
            exec,
            conv,
        } = self;
        let mut claim = Claim::acquire(owner)?;

        trace(label, Phase::Running);
        let outcome = exec();
        trace(label, Phase::Converting);
        let result = conv(outcome);
        claim.release();
        trace(label, Phase::Delivered);
        result
    }

    /// Queue exec on the worker pool. Precondition failures are returned
    /// here; everything after submission is delivered to `callback`.
    pub fn run_async<F>(self, event_loop: &EventLoop, callback: F) -> Result<()>
    where
        F: FnOnce(Result<T>) + 'static,
    {
        let Operation {
            label,
            owner,
            exec,
            conv,
        } = self;
        let mut claim = Claim::acquire(owner)?;

        trace(label, Phase::Running);
        event_loop.submit(exec, move |outcome| {
            trace(label, Phase::Converting);
            let result = match outcome {
                Some(outcome) => conv(outcome),
                None => Err(Error::Aborted),
            };
            claim.release();
            trace(label, Phase::Delivered);
            callback(result);
            drop(claim);
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    /// Resource that counts claims and can be made unavailable.
    #[derive(Default)]
    struct Probe {
        available: Cell<bool>,
        held: Cell<bool>,
        acquired: Cell<usize>,
        released: Cell<usize>,
    }

    impl Probe {
        fn open() -> Rc<Self> {
            let probe = Rc::new(Probe::default());
            probe.available.set(true);
            probe
        }
    }

    impl Resource for Probe {
        fn acquire(&self) -> Result<()> {
            if !self.available.get() {
                return Err(Error::IllegalState("probe closed".into()));
            }
            if self.held.replace(true) {
                return Err(Error::ConcurrentAccess);
            }
            self.acquired.set(self.acquired.get() + 1);
            Ok(())
        }

        fn release(&self) {
            self.held.set(false);
            self.released.set(self.released.get() + 1);
        }
    }

    #[test]
    fn test_sync_run_converts_in_place() {
        let probe = Probe::open();
        let op = Operation::new("double", || 21, |n: i32| Ok(n * 2)).owned_by(probe.clone());
        assert_eq!(op.label(), "double");
        assert_eq!(op.run_sync().unwrap(), 42);
        assert_eq!(probe.acquired.get(), 1);
        assert_eq!(probe.released.get(), 1);
    }

    #[test]
    fn test_precondition_failure_skips_work() {
        let probe = Rc::new(Probe::default());
        let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran_in = ran.clone();
        let op = Operation::new(
            "never",
            move || ran_in.store(true, std::sync::atomic::Ordering::SeqCst),
            |_| Ok(()),
        )
        .owned_by(probe.clone());

        let lp = EventLoop::new(1).unwrap();
        let err = op.run_async(&lp, |_| panic!("must not deliver")).unwrap_err();
        assert!(err.is_illegal_state());
        assert_eq!(lp.pending(), 0);
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn test_async_claim_spans_flight() {
        let probe = Probe::open();
        let lp = EventLoop::new(2).unwrap();
        let delivered = Rc::new(RefCell::new(None));

        let out = delivered.clone();
        Operation::new("slow", || "done", |s: &'static str| Ok(s.to_string()))
            .owned_by(probe.clone())
            .run_async(&lp, move |r| *out.borrow_mut() = Some(r))
            .unwrap();

        // Second claim while the first is in flight fails fast.
        let second = Operation::new("again", || (), |_| Ok(())).owned_by(probe.clone());
        assert!(matches!(second.run_sync(), Err(Error::ConcurrentAccess)));

        lp.run().unwrap();
        assert_eq!(delivered.borrow_mut().take().unwrap().unwrap(), "done");
        assert_eq!(probe.released.get(), 1);
        assert!(!probe.held.get());
    }

    #[test]
    fn test_release_happens_before_callback() {
        let probe = Probe::open();
        let lp = EventLoop::new(1).unwrap();
        let held_in_callback = Rc::new(Cell::new(true));

        let probe_in = probe.clone();
        let flag = held_in_callback.clone();
        Operation::new("noop", || (), |_| Ok(()))
            .owned_by(probe.clone())
            .run_async(&lp, move |_| flag.set(probe_in.held.get()))
            .unwrap();
        lp.run().unwrap();
        assert!(!held_in_callback.get());
    }

    #[test]
    fn test_exec_panic_is_aborted_and_released() {
        let probe = Probe::open();
        let lp = EventLoop::new(1).unwrap();
        let delivered = Rc::new(RefCell::new(None));

        let out = delivered.clone();
        Operation::new("boom", || -> u8 { panic!("native crash") }, |v| Ok(v))
            .owned_by(probe.clone())
            .run_async(&lp, move |r| *out.borrow_mut() = Some(r))
            .unwrap();
        lp.run().unwrap();

        let result = delivered.borrow_mut().take().unwrap();
        assert!(matches!(result, Err(Error::Aborted)));
        assert_eq!(probe.released.get(), 1);
    }
}
