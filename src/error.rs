//! Error taxonomy for pool operations.

use std::io;
use thiserror::Error;

/// Errors returned by pool construction and job-graph operations.
///
/// Capacity (`QueueFull`) and structural (`DependencyCycle`) errors are
/// recoverable; the caller picks a fallback. `ThreadCreation` is fatal to
/// pool construction and leaves no partially-initialized pool behind.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A non-blocking submission hit a ring buffer at capacity.
    #[error("job queue is full")]
    QueueFull,

    /// Registering the dependency would create a cycle or exceed the
    /// maximum chain depth.
    #[error("dependency rejected: cycle or chain depth limit exceeded")]
    DependencyCycle,

    /// Spawning a worker or I/O thread failed during pool creation.
    #[error("failed to spawn pool thread")]
    ThreadCreation(#[source] io::Error),

    /// A pool-management call (shutdown, wait-for-all) was made from a
    /// thread owned by the pool itself.
    #[error("pool management call from a pool-owned thread")]
    ThreadViolation,

    /// The job handle no longer names a live, modifiable job.
    #[error("job handle is stale or the job has already started")]
    StaleJob,

    /// One or more workers panicked; reported by shutdown.
    #[error("{0} worker thread(s) panicked")]
    WorkersPanicked(usize),
}
