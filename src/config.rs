//! LEVEE - Configuration
//! Tunable parameters for opening a database, reading, writing, and for the
//! runtime that bridges the event loop and the worker pool.

use crate::snapshot::Snapshot;

/// Comparator name used when none is configured.
pub const DEFAULT_COMPARATOR: &str = "levee.BytewiseComparator";

/// Environment variable overriding the worker pool size.
pub const THREADPOOL_SIZE_ENV: &str = "LEVEE_THREADPOOL_SIZE";

/// Options for opening a database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Create the database directory if it does not exist.
    pub create_if_missing: bool,

    /// Fail to open if a database already exists at the path.
    pub error_if_exists: bool,

    /// Treat a corrupt WAL tail as a hard error instead of dropping it.
    pub paranoid_checks: bool,

    /// Bytes written since the last checkpoint before the WAL is rewritten.
    pub write_buffer_size: usize,

    /// Name of the key comparator. Persisted and checked on reopen.
    pub comparator: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: false,
            error_if_exists: false,
            paranoid_checks: false,
            write_buffer_size: 4 * 1024 * 1024, // 4 MB
            comparator: DEFAULT_COMPARATOR.to_string(),
        }
    }
}

impl Options {
    pub fn with_create_if_missing(mut self, enabled: bool) -> Self {
        self.create_if_missing = enabled;
        self
    }

    pub fn with_error_if_exists(mut self, enabled: bool) -> Self {
        self.error_if_exists = enabled;
        self
    }

    pub fn with_paranoid_checks(mut self, enabled: bool) -> Self {
        self.paranoid_checks = enabled;
        self
    }

    pub fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    pub fn with_comparator(mut self, name: impl Into<String>) -> Self {
        self.comparator = name.into();
        self
    }
}

/// Options for point lookups and iterators.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Forwarded to the engine; the bundled engine has no block checksums.
    pub verify_checksums: bool,

    /// Forwarded to the engine; the bundled engine has no block cache.
    pub fill_cache: bool,

    /// Read from this point-in-time view instead of the latest state.
    pub snapshot: Option<Snapshot>,

    /// Return results as binary buffers instead of text.
    pub as_buffer: bool,
}

impl ReadOptions {
    pub fn with_snapshot(mut self, snapshot: &Snapshot) -> Self {
        self.snapshot = Some(snapshot.clone());
        self
    }

    pub fn with_as_buffer(mut self, enabled: bool) -> Self {
        self.as_buffer = enabled;
        self
    }
}

/// Options for writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Sync the WAL to disk before the write is acknowledged.
    pub sync: bool,
}

impl WriteOptions {
    pub fn with_sync(mut self, enabled: bool) -> Self {
        self.sync = enabled;
        self
    }
}

/// Configuration for the event loop and its worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Number of worker threads executing native calls.
    pub worker_threads: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { worker_threads: 4 }
    }
}

impl RuntimeConfig {
    /// Build a config honoring `LEVEE_THREADPOOL_SIZE` when it holds a
    /// positive integer.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(THREADPOOL_SIZE_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.worker_threads = n,
                _ => log::warn!("Ignoring invalid {}={:?}", THREADPOOL_SIZE_ENV, raw),
            }
        }
        config
    }

    pub fn with_worker_threads(mut self, n: usize) -> Self {
        self.worker_threads = n.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_defaults() {
        let options = Options::default();
        assert!(!options.create_if_missing);
        assert!(!options.error_if_exists);
        assert_eq!(options.comparator, DEFAULT_COMPARATOR);
        assert!(!WriteOptions::default().sync);
    }

    #[test]
    fn test_builders() {
        let options = Options::default()
            .with_create_if_missing(true)
            .with_write_buffer_size(1024);
        assert!(options.create_if_missing);
        assert_eq!(options.write_buffer_size, 1024);
        assert_eq!(RuntimeConfig::default().with_worker_threads(0).worker_threads, 1);
    }
}
