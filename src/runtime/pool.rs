//! LEVEE - Worker Pool
//! Fixed set of named threads pulling boxed jobs off a crossbeam channel.
//! The pool knows nothing about results: a job is responsible for storing
//! its own outcome and signalling completion.

use std::io;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};

/// A unit of work shipped to a worker thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    jobs: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `threads` workers (at least one).
    pub fn new(threads: usize) -> io::Result<Self> {
        let threads = threads.max(1);
        let (tx, rx) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("levee-worker-{}", index))
                .spawn(move || worker_loop(index, rx))?;
            workers.push(handle);
        }
        log::debug!("Worker pool started with {} threads", threads);
        Ok(Self {
            jobs: Some(tx),
            workers,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue a job. Hands the job back if no worker can take it.
    pub fn execute(&self, job: Job) -> Result<(), Job> {
        match &self.jobs {
            Some(tx) => tx.send(job).map_err(|e| e.into_inner()),
            None => Err(job),
        }
    }
}

fn worker_loop(index: usize, rx: Receiver<Job>) {
    log::trace!("levee-worker-{} waiting for jobs", index);
    for job in rx.iter() {
        job();
    }
    log::trace!("levee-worker-{} stopped", index);
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel ends every worker loop once the queue drains.
        self.jobs.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("Worker thread panicked during shutdown");
            }
        }
    }
}
