//! LEVEE - Event-Loop Binding for a Blocking Key-Value Engine
//!
//! Exposes a synchronous, blocking storage engine to a single-threaded
//! event-driven host. Native calls run on a worker pool; results come back
//! to the loop thread, where host-visible values and proxies live.
//!
//! ## Features
//! - **Operation bridge**: every call runs inline, or on the pool with its
//!   result delivered to a callback on the loop thread
//! - **Resource lifecycle**: iterators and snapshots keep their database
//!   alive, the database tracks them weakly and neutralizes them on close
//! - **Exclusive iterators**: overlapping operations on one iterator fail
//!   fast with `ConcurrentAccess`
//! - **Bundled engine**: multi-version MemTable, CRC32-checked WAL and
//!   pinned snapshots
//! - **Metrics**: lock-free atomic counters exposed as `levee.stats`
//!
//! ## Example
//! ```no_run
//! use levee::{Context, Database, Options, ReadOptions, RuntimeConfig, WriteOptions};
//!
//! let ctx = Context::new(RuntimeConfig::default()).unwrap();
//! let db = Database::open(&ctx, "/tmp/levee-demo", Options::default().with_create_if_missing(true)).unwrap();
//!
//! db.put("key", "value", WriteOptions::default()).unwrap();
//! db.get_async("key", ReadOptions::default(), |result| {
//!     println!("{:?}", result.unwrap());
//! })
//! .unwrap();
//! ctx.run().unwrap();
//! ```

pub mod batch;
pub mod config;
pub mod context;
pub mod database;
pub mod engine;
pub mod error;
pub mod host;
pub mod iterator;
pub mod registry;
pub mod runtime;
pub mod snapshot;
pub mod status;
pub mod types;

pub use batch::Batch;
pub use config::{Options, ReadOptions, RuntimeConfig, WriteOptions};
pub use context::Context;
pub use database::Database;
pub use error::{EngineError, Error, Result};
pub use host::{HostBuffer, HostObject, HostValue, Payload};
pub use iterator::DbIterator;
pub use snapshot::Snapshot;
pub use status::Status;
