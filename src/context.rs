//! LEVEE - Context
//! The one object everything else is created from: the event loop (with its
//! worker pool) and the backend that opens engines. Nothing in the crate is
//! process-global; two contexts are fully independent.

use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::engine::{Backend, DiskBackend};
use crate::error::Result;
use crate::runtime::EventLoop;

#[derive(Clone)]
pub struct Context {
    event_loop: EventLoop,
    backend: Arc<dyn Backend>,
}

impl Context {
    /// Context backed by the bundled on-disk engine.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        Self::with_backend(config, Arc::new(DiskBackend))
    }

    pub fn with_backend(config: RuntimeConfig, backend: Arc<dyn Backend>) -> Result<Self> {
        let event_loop = EventLoop::new(config.worker_threads)?;
        log::info!(
            "Context ready with {} worker threads",
            event_loop.worker_threads()
        );
        Ok(Self {
            event_loop,
            backend,
        })
    }

    /// Context sized from `LEVEE_THREADPOOL_SIZE`, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::new(RuntimeConfig::from_env())
    }

    pub fn event_loop(&self) -> &EventLoop {
        &self.event_loop
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Deliver completions until no operation is outstanding.
    pub fn run(&self) -> Result<()> {
        self.event_loop.run()
    }

    /// Deliver one completion, blocking for it. `Ok(false)` when idle.
    pub fn run_once(&self) -> Result<bool> {
        self.event_loop.run_once()
    }

    pub fn pending(&self) -> usize {
        self.event_loop.pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_runs_idle() {
        let ctx = Context::new(RuntimeConfig::default().with_worker_threads(2)).unwrap();
        assert_eq!(ctx.event_loop().worker_threads(), 2);
        assert_eq!(ctx.pending(), 0);
        ctx.run().unwrap();
        assert!(!ctx.run_once().unwrap());
    }
}
