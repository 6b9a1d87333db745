//! # genpool - Generational Dual-Priority Job Scheduler
//!
//! A fixed-capacity thread pool for short-lived units of work with O(1)
//! completion tracking, inter-job dependency graphs, and graceful
//! degradation when queues saturate.
//!
//! ## Architecture
//!
//! - **Job slots**: a fixed array of reusable records; a 16-bit generation
//!   counter per slot makes every [`JobId`] stale-detectable in O(1).
//! - **Priority rings**: two fixed-capacity ring buffers (high for
//!   latency-sensitive work, low for background/IO-class work); workers
//!   always drain high before low.
//! - **Workers**: a bounded set of threads parked on a wake condition when
//!   both rings are empty.
//! - **Dependency graph**: pool-owned adjacency lists; a completed job
//!   releases every dependent whose prerequisite count reaches zero.
//! - **I/O worker**: one extra thread for disk-bound work (async loads,
//!   hot-reload polling) so disk stalls never starve compute.
//! - **Fork-join**: [`JobPool::dispatch_parallel`] splits an index range
//!   into chunk jobs and blocks until all of them finish.
//!
//! ## Example
//!
//! ```
//! use genpool::{JobPool, PoolConfig, SubmitFlags};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! fn touch(_payload: *const u8, ctx: *mut ()) {
//!     let hits = unsafe { &*(ctx as *const AtomicUsize) };
//!     hits.fetch_add(1, Ordering::SeqCst);
//! }
//!
//! let pool = JobPool::new(PoolConfig::default()).unwrap();
//! let hits = AtomicUsize::new(0);
//!
//! let id = pool.submit(
//!     touch,
//!     &[],
//!     &hits as *const AtomicUsize as *mut (),
//!     SubmitFlags::HIGH_PRIORITY,
//! );
//! assert!(pool.wait_for_job(id));
//! assert_eq!(hits.load(Ordering::SeqCst), 1);
//!
//! // Parallel loop with barrier semantics.
//! let sum = AtomicUsize::new(0);
//! pool.dispatch_parallel(10_000, 100, |i| {
//!     sum.fetch_add(i, Ordering::Relaxed);
//! });
//! assert_eq!(sum.load(Ordering::Relaxed), 10_000 * 9_999 / 2);
//!
//! pool.shutdown().unwrap();
//! ```

mod dispatch;
pub mod error;
mod graph;
pub mod io;
pub mod job;
pub mod metrics;
pub mod pool;
mod queue;
mod worker;

pub use error::PoolError;
pub use io::{LoadCallback, SaveCallback, WatchCallback};
pub use job::{
    JobFn, JobId, Priority, SubmitFlags, INLINE_PAYLOAD, MAX_DEPENDENCY_DEPTH, MAX_SLOTS,
    MAX_THREADS,
};
pub use metrics::MetricsSnapshot;
pub use pool::{JobPool, PoolConfig};
