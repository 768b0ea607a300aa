//! LEVEE - Engine Metrics & Observability
//! Atomic counters for tracking engine calls made from worker threads,
//! readable from the event loop through the `levee.stats` property.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Atomic operation counters for the bundled engine.
///
/// All counters use `Ordering::Relaxed`; they are observability only.
#[derive(Debug)]
pub struct EngineMetrics {
    /// Point lookups.
    pub gets: AtomicU64,
    /// Committed write batches.
    pub writes: AtomicU64,
    /// Put operations inside committed batches.
    pub puts: AtomicU64,
    /// Delete operations inside committed batches.
    pub deletes: AtomicU64,
    /// Cursor positioning calls (seek, first, last, next, prev).
    pub cursor_steps: AtomicU64,
    /// Snapshots handed out.
    pub snapshots: AtomicU64,
    /// WAL rewrites triggered by the write buffer threshold.
    pub checkpoints: AtomicU64,
    /// Total bytes written (keys + values).
    pub bytes_written: AtomicU64,
    /// Total bytes read (values returned by get).
    pub bytes_read: AtomicU64,
    /// Number of WAL records replayed at open.
    pub wal_records_replayed: AtomicU64,
    /// Timestamp when the engine was opened.
    engine_started: Instant,
}

impl EngineMetrics {
    /// Create a new metrics instance with all counters at zero.
    pub fn new() -> Self {
        Self {
            gets: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            cursor_steps: AtomicU64::new(0),
            snapshots: AtomicU64::new(0),
            checkpoints: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            wal_records_replayed: AtomicU64::new(0),
            engine_started: Instant::now(),
        }
    }

    pub fn record_get(&self, value_size: Option<usize>) {
        self.gets.fetch_add(1, Ordering::Relaxed);
        if let Some(size) = value_size {
            self.bytes_read.fetch_add(size as u64, Ordering::Relaxed);
        }
    }

    pub fn record_write(&self, puts: usize, deletes: usize, bytes: usize) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.puts.fetch_add(puts as u64, Ordering::Relaxed);
        self.deletes.fetch_add(deletes as u64, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_cursor_step(&self) {
        self.cursor_steps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot(&self) {
        self.snapshots.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_checkpoint(&self) {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replay(&self, records: usize) {
        self.wal_records_replayed
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    /// Get engine uptime in seconds.
    pub fn uptime_secs(&self) -> f64 {
        self.engine_started.elapsed().as_secs_f64()
    }

    /// Get total number of operations (gets + writes + cursor steps).
    pub fn total_ops(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
            + self.writes.load(Ordering::Relaxed)
            + self.cursor_steps.load(Ordering::Relaxed)
    }

    /// Format metrics as a human-readable report.
    pub fn report(&self) -> String {
        format!(
            "Operations:\n\
               gets:         {}\n\
               writes:       {}\n\
               puts:         {}\n\
               deletes:      {}\n\
               cursor steps: {}\n\
               snapshots:    {}\n\
               checkpoints:  {}\n\
             I/O:\n\
               written:      {} bytes\n\
               read:         {} bytes\n\
             Recovery:\n\
               wal records replayed: {}\n\
             Uptime: {:.2}s",
            self.gets.load(Ordering::Relaxed),
            self.writes.load(Ordering::Relaxed),
            self.puts.load(Ordering::Relaxed),
            self.deletes.load(Ordering::Relaxed),
            self.cursor_steps.load(Ordering::Relaxed),
            self.snapshots.load(Ordering::Relaxed),
            self.checkpoints.load(Ordering::Relaxed),
            self.bytes_written.load(Ordering::Relaxed),
            self.bytes_read.load(Ordering::Relaxed),
            self.wal_records_replayed.load(Ordering::Relaxed),
            self.uptime_secs(),
        )
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_operations() {
        let m = EngineMetrics::new();

        m.record_write(2, 1, 25);
        m.record_get(Some(10));
        m.record_get(None); // miss
        m.record_cursor_step();
        m.record_checkpoint();

        assert_eq!(m.writes.load(Ordering::Relaxed), 1);
        assert_eq!(m.puts.load(Ordering::Relaxed), 2);
        assert_eq!(m.deletes.load(Ordering::Relaxed), 1);
        assert_eq!(m.gets.load(Ordering::Relaxed), 2);
        assert_eq!(m.bytes_written.load(Ordering::Relaxed), 25);
        assert_eq!(m.bytes_read.load(Ordering::Relaxed), 10);
        assert_eq!(m.total_ops(), 4);
    }

    #[test]
    fn test_report_format() {
        let m = EngineMetrics::new();
        m.record_write(1, 0, 30);
        let report = m.report();
        assert!(report.contains("writes:"));
        assert!(report.contains("cursor steps:"));
        assert!(report.contains("written:"));
    }

    #[test]
    fn test_default() {
        let m = EngineMetrics::default();
        assert_eq!(m.total_ops(), 0);
    }
}
