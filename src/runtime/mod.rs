//! LEVEE - Event Loop
//! The single-threaded side of the bridge. Work is submitted as a pair:
//! a `Send` exec closure that runs on the worker pool and fills a shared
//! result slot, and a continuation that stays on the loop thread. Workers
//! report the task id on the completion channel; `run_once` pops one id and
//! invokes the matching continuation with whatever the slot holds.
//!
//! ## Guarantees
//! - Continuations only ever run on the thread that calls `run`/`run_once`
//! - A task counts as pending from `submit` until its continuation returns,
//!   so `run` keeps draining while any operation is outstanding
//! - A panicking exec leaves the slot empty (the continuation sees `None`)
//! - A panicking continuation surfaces from `run` as `Error::Uncaught`

pub mod operation;
pub mod pool;

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::error::{EngineError, Error, Result};

pub use self::operation::{Operation, Phase, Resource};
pub use self::pool::WorkerPool;

type Continuation = Box<dyn FnOnce()>;

/// Handle to the event loop. Cloning shares the same loop.
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<LoopInner>,
}

struct LoopInner {
    pool: WorkerPool,
    done_tx: Sender<u64>,
    done_rx: Receiver<u64>,
    pending: RefCell<HashMap<u64, Continuation>>,
    next_task: Cell<u64>,
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl EventLoop {
    /// Create a loop backed by `worker_threads` pool threads.
    pub fn new(worker_threads: usize) -> Result<Self> {
        let pool = WorkerPool::new(worker_threads).map_err(EngineError::from)?;
        let (done_tx, done_rx) = unbounded();
        Ok(Self {
            inner: Rc::new(LoopInner {
                pool,
                done_tx,
                done_rx,
                pending: RefCell::new(HashMap::new()),
                next_task: Cell::new(1),
            }),
        })
    }

    pub fn worker_threads(&self) -> usize {
        self.inner.pool.size()
    }

    /// Number of submitted tasks whose continuation has not run yet.
    pub fn pending(&self) -> usize {
        self.inner.pending.borrow().len()
    }

    /// Run `exec` on the pool; `complete` later runs on the loop thread
    /// with `Some(result)`, or `None` if `exec` panicked.
    pub fn submit<R, E, C>(&self, exec: E, complete: C)
    where
        R: Send + 'static,
        E: FnOnce() -> R + Send + 'static,
        C: FnOnce(Option<R>) + 'static,
    {
        let id = self.inner.next_task.get();
        self.inner.next_task.set(id + 1);

        let slot: Arc<Mutex<Option<R>>> = Arc::new(Mutex::new(None));
        let worker_slot = slot.clone();
        self.inner.pending.borrow_mut().insert(
            id,
            Box::new(move || {
                let result = slot.lock().take();
                complete(result);
            }),
        );

        let done = self.inner.done_tx.clone();
        let job = Box::new(move || {
            match panic::catch_unwind(AssertUnwindSafe(exec)) {
                Ok(result) => *worker_slot.lock() = Some(result),
                Err(payload) => {
                    log::error!("Task {} panicked on a worker: {}", id, panic_message(&*payload));
                }
            }
            // The loop holds a receiver for as long as it exists.
            let _ = done.send(id);
        });

        log::trace!("Task {} submitted", id);
        if let Err(job) = self.inner.pool.execute(job) {
            log::warn!("Worker pool unavailable, running task {} inline", id);
            job();
        }
    }

    /// Block until one task completes and run its continuation.
    /// Returns `Ok(false)` when nothing is pending.
    pub fn run_once(&self) -> Result<bool> {
        if self.pending() == 0 {
            return Ok(false);
        }
        let id = match self.inner.done_rx.recv() {
            Ok(id) => id,
            Err(_) => return Ok(false),
        };
        // Released before the call so continuations can submit more work.
        let continuation = self.inner.pending.borrow_mut().remove(&id);
        let Some(continuation) = continuation else {
            log::warn!("Completion for unknown task {}", id);
            return Ok(true);
        };

        log::trace!("Task {} completing", id);
        panic::catch_unwind(AssertUnwindSafe(continuation)).map_err(|payload| {
            let message = panic_message(&*payload);
            log::error!("Uncaught panic in callback of task {}: {}", id, message);
            Error::Uncaught(message)
        })?;
        Ok(true)
    }

    /// Drain completions until no task is outstanding.
    pub fn run(&self) -> Result<()> {
        while self.run_once()? {}
        Ok(())
    }
}

impl Drop for LoopInner {
    fn drop(&mut self) {
        let abandoned = self.pending.get_mut().len();
        if abandoned > 0 {
            log::warn!("Event loop dropped with {} undelivered tasks", abandoned);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_continuation_runs_on_loop_thread() {
        let lp = EventLoop::new(2).unwrap();
        let loop_thread = thread::current().id();
        let seen = Rc::new(Cell::new(None));

        let seen_in = seen.clone();
        lp.submit(
            || thread::current().id(),
            move |worker| {
                assert_eq!(thread::current().id(), loop_thread);
                seen_in.set(worker);
            },
        );
        assert_eq!(lp.pending(), 1);
        lp.run().unwrap();
        assert_eq!(lp.pending(), 0);

        let worker = seen.get().unwrap();
        assert_ne!(worker, loop_thread);
    }

    #[test]
    fn test_exec_panic_yields_empty_slot() {
        let lp = EventLoop::new(1).unwrap();
        let outcome = Rc::new(Cell::new(Some(0)));
        let outcome_in = outcome.clone();
        lp.submit(
            || -> u32 { panic!("exec blew up") },
            move |result| outcome_in.set(result),
        );
        lp.run().unwrap();
        assert_eq!(outcome.get(), None);
    }

    #[test]
    fn test_callback_panic_is_uncaught() {
        let lp = EventLoop::new(1).unwrap();
        lp.submit(|| 1, |_| panic!("callback bug"));
        let err = lp.run().unwrap_err();
        assert!(matches!(err, Error::Uncaught(msg) if msg.contains("callback bug")));
        assert_eq!(lp.pending(), 0);
    }

    #[test]
    fn test_continuations_can_chain() {
        let lp = EventLoop::new(2).unwrap();
        let total = Rc::new(Cell::new(0));

        let lp_in = lp.clone();
        let total_in = total.clone();
        lp.submit(
            || 1,
            move |first| {
                let total_in = total_in.clone();
                lp_in.submit(
                    move || first.unwrap_or(0) + 1,
                    move |second| total_in.set(second.unwrap_or(0)),
                );
            },
        );
        lp.run().unwrap();
        assert_eq!(total.get(), 2);
    }

    #[test]
    fn test_run_once_on_idle_loop() {
        let lp = EventLoop::new(1).unwrap();
        assert!(!lp.run_once().unwrap());
    }
}
