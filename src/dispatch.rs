//! Synchronous fork-join dispatch over an index range.
//!
//! `dispatch_parallel` partitions `[0, count)` into contiguous chunks,
//! submits one high-priority job per chunk, and blocks the caller until
//! every chunk has run. Because the call is a barrier, the chunk
//! descriptors (and the caller's closure) can live on the dispatching
//! thread's stack and be handed to workers by pointer.

use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::utils::Backoff;
use parking_lot::{Condvar, Mutex};

use crate::job::SubmitFlags;
use crate::pool::JobPool;
use crate::worker;

/// Countdown barrier for one dispatch call.
struct Latch {
    remaining: AtomicUsize,
    lock: Mutex<()>,
    cond: Condvar,
}

impl Latch {
    fn new(count: usize) -> Latch {
        Latch {
            remaining: AtomicUsize::new(count),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    fn signal(&self) {
        // The decrement must happen under the lock: the latch lives on the
        // dispatching thread's stack, and the dispatcher may tear it down
        // the moment it observes the barrier open. Holding the lock across
        // the final decrement keeps the signaler ordered before that.
        let _guard = self.lock.lock();
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.cond.notify_all();
        }
    }

    fn is_open(&self) -> bool {
        self.remaining.load(Ordering::Acquire) == 0
    }
}

/// Stack-resident description of one chunk. The borrows live on the
/// dispatching thread's stack; the barrier guarantees they outlive every
/// chunk job, so handing the descriptor to workers by pointer is sound.
struct ChunkArgs<'a> {
    func: &'a (dyn Fn(usize) + Sync),
    latch: &'a Latch,
    start: usize,
    end: usize,
}

fn run_chunk(payload: *const u8, _ctx: *mut ()) {
    let args = unsafe { &*(payload as *const ChunkArgs) };
    for index in args.start..args.end {
        (args.func)(index);
    }
    args.latch.signal();
}

impl JobPool {
    /// Runs `func(index)` for every index in `[0, count)`, in parallel.
    ///
    /// Workloads below `min_batch_size` execute inline on the caller with
    /// no job overhead. Larger ranges are split into contiguous chunks of
    /// at least `min_batch_size` indices; indices within a chunk run
    /// sequentially on one worker, and there is no ordering between chunks.
    /// The call returns only after every chunk has completed (barrier
    /// semantics). A chunk that cannot be queued runs inline instead, so
    /// the call makes progress under any load.
    pub fn dispatch_parallel<F>(&self, count: usize, min_batch_size: usize, func: F)
    where
        F: Fn(usize) + Sync,
    {
        if count == 0 {
            return;
        }
        let min_batch = min_batch_size.max(1);
        if count < min_batch {
            for index in 0..count {
                func(index);
            }
            return;
        }

        // At most a few chunks per worker; each at least min_batch wide.
        let max_chunks = (self.num_workers() * 4).max(1);
        let chunk_size = min_batch.max(count.div_ceil(max_chunks));
        let chunks = count.div_ceil(chunk_size);

        let latch = Latch::new(chunks);
        let func_obj: &(dyn Fn(usize) + Sync) = &func;
        let mut args = Vec::with_capacity(chunks);
        for c in 0..chunks {
            let start = c * chunk_size;
            args.push(ChunkArgs {
                func: func_obj,
                latch: &latch,
                start,
                end: (start + chunk_size).min(count),
            });
        }
        // `args` must not reallocate once pointers are taken.
        for chunk in &args {
            let payload = chunk as *const ChunkArgs as *const u8;
            let id = unsafe {
                self.submit_borrowed(
                    run_chunk,
                    payload,
                    ptr::null_mut(),
                    SubmitFlags::HIGH_PRIORITY,
                )
            };
            if !id.is_valid() {
                // Rejected submission: the chunk never entered a ring.
                run_chunk(payload, ptr::null_mut());
            }
        }

        if worker::is_pool_thread() {
            // A worker blocking on the latch could deadlock the pool; help
            // drain queues until the barrier opens instead.
            let backoff = Backoff::new();
            while !latch.is_open() {
                if let Some(id) = self.shared().next_job() {
                    self.shared().execute(id);
                    backoff.reset();
                } else {
                    backoff.snooze();
                }
            }
            // The final signaler may still hold the latch lock; passing
            // through it once orders the latch's destruction after that
            // signaler is done with it.
            drop(latch.lock.lock());
        } else {
            let mut guard = latch.lock.lock();
            while !latch.is_open() {
                latch.cond.wait(&mut guard);
            }
        }
    }
}
