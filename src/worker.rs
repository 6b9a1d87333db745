//! Compute worker threads.
//!
//! Workers pull from the high-priority ring first, then the low-priority
//! ring, and park on the pool's wake condition when both are empty. A
//! shutdown observed while idle ends the thread; a job already picked up is
//! always allowed to finish.

use std::cell::Cell;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::debug;

use crate::pool::PoolShared;

thread_local! {
    static POOL_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as owned by a pool. Used to reject
/// self-deadlocking management calls and to pick the fork-join help path.
pub(crate) fn mark_pool_thread() {
    POOL_THREAD.with(|f| f.set(true));
}

pub(crate) fn is_pool_thread() -> bool {
    POOL_THREAD.with(|f| f.get())
}

/// One compute worker thread.
pub(crate) struct Worker {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawns a named worker thread, optionally pinned to core `id`.
    pub(crate) fn spawn(
        id: usize,
        shared: Arc<PoolShared>,
        pin_to_core: bool,
    ) -> io::Result<Worker> {
        let handle = thread::Builder::new()
            .name(format!("genpool-worker-{id}"))
            .spawn(move || {
                mark_pool_thread();
                if pin_to_core {
                    if let Some(core_ids) = core_affinity::get_core_ids() {
                        if id < core_ids.len() {
                            core_affinity::set_for_current(core_ids[id]);
                        }
                    }
                }
                debug!(worker = id, "worker started");
                Worker::run_loop(&shared);
                debug!(worker = id, "worker exiting");
            })?;
        Ok(Worker {
            id,
            handle: Some(handle),
        })
    }

    fn run_loop(shared: &PoolShared) {
        loop {
            // Checked before popping so work still queued at shutdown is
            // discarded by the drain instead of raced by exiting workers.
            if shared.is_shutdown() {
                break;
            }
            match shared.next_job() {
                Some(id) => shared.execute(id),
                None => shared.park_worker(),
            }
        }
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    /// Joins the worker thread, reporting a panic as `Err`.
    pub(crate) fn join(mut self) -> thread::Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}
