//! The job pool: slot array, priority rings, workers, and lifecycle.
//!
//! `JobPool` is an explicitly constructed, explicitly destroyed object; all
//! operations take it by reference, there is no process-wide singleton. It
//! owns the fixed job slot array, the two priority ring buffers, the compute
//! workers, and the dedicated I/O worker.

use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::PoolError;
use crate::graph::DependencyGraph;
use crate::io::{IoRequest, IoWorker};
use crate::job::{
    JobFn, JobId, JobSlot, JobState, Payload, Priority, SubmitFlags, MAX_SLOTS, MAX_THREADS,
};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::queue::RingQueue;
use crate::worker::{self, Worker};

/// Pool construction parameters.
///
/// Everything is fixed at creation time: thread count, queue capacities and
/// the slot array never change afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Compute worker count, clamped to `[1, MAX_THREADS]`.
    pub threads: usize,
    /// Capacity of each priority ring; rounded up to a power of two.
    pub queue_capacity: usize,
    /// Job slot count, clamped to `[1, MAX_SLOTS]`.
    pub max_jobs: usize,
    /// Hot-reload poll interval for the I/O worker. Zero disables polling.
    pub io_poll_interval: Duration,
    /// Skip the I/O thread; I/O requests then run synchronously on the
    /// calling thread.
    pub disable_io_thread: bool,
    /// Pin each worker to a core for cache locality.
    pub pin_workers: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let threads = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        PoolConfig {
            threads,
            queue_capacity: 1024,
            max_jobs: 4096,
            io_poll_interval: Duration::from_millis(250),
            disable_io_thread: false,
            pin_workers: false,
        }
    }
}

enum SlotAlloc {
    Acquired(usize),
    /// No slot free and RUN_IF_FULL set: execute on the caller.
    Inline,
    Rejected,
}

/// State shared between the pool facade and its worker threads.
pub(crate) struct PoolShared {
    pub(crate) slots: Box<[JobSlot]>,
    free: Mutex<Vec<u32>>,
    /// Signaled when a slot returns to the free list.
    slot_freed: Condvar,
    high: RingQueue,
    low: RingQueue,
    pub(crate) graph: DependencyGraph,
    /// Ready jobs across both rings; checked under `wake_mutex` before a
    /// worker parks so an enqueue-notify cannot be missed.
    queued: AtomicUsize,
    wake_mutex: Mutex<()>,
    wake_cond: Condvar,
    /// Submitted but not yet completed jobs, gating the idle condition.
    active_jobs: AtomicUsize,
    idle_mutex: Mutex<()>,
    idle_cond: Condvar,
    shutdown: AtomicBool,
    pub(crate) metrics: Metrics,
}

impl PoolShared {
    fn new(slot_count: usize, queue_capacity: usize) -> PoolShared {
        PoolShared {
            slots: (0..slot_count)
                .map(|_| JobSlot::new())
                .collect::<Vec<_>>()
                .into_boxed_slice(),
            // Popping from the back hands out low indices last; start with
            // high indices on top so early submissions get stable slots.
            free: Mutex::new((0..slot_count as u32).rev().collect()),
            slot_freed: Condvar::new(),
            high: RingQueue::new(queue_capacity),
            low: RingQueue::new(queue_capacity),
            graph: DependencyGraph::new(slot_count),
            queued: AtomicUsize::new(0),
            wake_mutex: Mutex::new(()),
            wake_cond: Condvar::new(),
            active_jobs: AtomicUsize::new(0),
            idle_mutex: Mutex::new(()),
            idle_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            metrics: Metrics::new(),
        }
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Dequeues the next ready job, high priority first.
    pub(crate) fn next_job(&self) -> Option<JobId> {
        let id = self.high.try_pop().or_else(|| self.low.try_pop())?;
        self.queued.fetch_sub(1, Ordering::AcqRel);
        Some(id)
    }

    /// Parks the calling worker until new work or shutdown.
    pub(crate) fn park_worker(&self) {
        let mut guard = self.wake_mutex.lock();
        if self.queued.load(Ordering::Acquire) == 0 && !self.is_shutdown() {
            self.wake_cond.wait(&mut guard);
        }
    }

    fn notify_new_work(&self) {
        let _guard = self.wake_mutex.lock();
        self.wake_cond.notify_one();
    }

    fn wake_all_sleepers(&self) {
        {
            let _guard = self.wake_mutex.lock();
            self.wake_cond.notify_all();
        }
        self.high.wake_all();
        self.low.wake_all();
        self.slot_freed.notify_all();
        {
            let _guard = self.idle_mutex.lock();
            self.idle_cond.notify_all();
        }
    }

    fn alloc_slot(&self, flags: SubmitFlags, allow_inline: bool) -> SlotAlloc {
        let mut free = self.free.lock();
        loop {
            if let Some(idx) = free.pop() {
                return SlotAlloc::Acquired(idx as usize);
            }
            if allow_inline && flags.contains(SubmitFlags::RUN_IF_FULL) {
                return SlotAlloc::Inline;
            }
            if flags.contains(SubmitFlags::BLOCK_IF_FULL) {
                if self.is_shutdown() {
                    return SlotAlloc::Rejected;
                }
                self.slot_freed.wait(&mut free);
            } else {
                return SlotAlloc::Rejected;
            }
        }
    }

    fn prepare_slot(
        &self,
        idx: usize,
        func: JobFn,
        payload: Payload,
        ctx: *mut (),
        flags: SubmitFlags,
    ) -> JobId {
        let slot = &self.slots[idx];
        let generation = slot.generation.load(Ordering::Acquire);
        let mut data = slot.data.lock();
        data.func = Some(func);
        data.payload = payload;
        data.ctx = ctx;
        data.priority = flags.priority();
        data.submitted_at = Some(Instant::now());
        JobId::new(idx, generation)
    }

    /// Places a ready job into its ring, applying the backpressure policy.
    /// Returns false only when the job was neither queued nor executed.
    fn enqueue_ready(&self, id: JobId, flags: SubmitFlags) -> bool {
        let ring = match flags.priority() {
            Priority::High => &self.high,
            Priority::Low => &self.low,
        };
        self.slots[id.slot()]
            .state
            .store(JobState::Queued as u8, Ordering::Release);
        if ring.try_push(id) {
            self.queued.fetch_add(1, Ordering::AcqRel);
            self.notify_new_work();
            return true;
        }
        if flags.contains(SubmitFlags::RUN_IF_FULL) {
            self.metrics.record_inline();
            self.execute(id);
            return true;
        }
        if flags.contains(SubmitFlags::BLOCK_IF_FULL) {
            if ring.push_blocking(id, &self.shutdown) {
                self.queued.fetch_add(1, Ordering::AcqRel);
                self.notify_new_work();
                return true;
            }
            return false;
        }
        false
    }

    pub(crate) fn submit_job(
        &self,
        func: JobFn,
        payload: Payload,
        ctx: *mut (),
        flags: SubmitFlags,
    ) -> JobId {
        if self.is_shutdown() {
            return JobId::INVALID;
        }
        let idx = match self.alloc_slot(flags, true) {
            SlotAlloc::Acquired(idx) => idx,
            SlotAlloc::Inline => {
                // Forward progress with no slot to name the job by.
                self.metrics.record_inline();
                func(payload.as_ptr(), ctx);
                return JobId::INVALID;
            }
            SlotAlloc::Rejected => return JobId::INVALID,
        };
        let id = self.prepare_slot(idx, func, payload, ctx, flags);
        self.metrics.record_submit();
        self.active_jobs.fetch_add(1, Ordering::AcqRel);
        if !self.enqueue_ready(id, flags) {
            self.finish_one();
            self.recycle_slot(idx);
            return JobId::INVALID;
        }
        id
    }

    /// Allocates a job in Held state with a +1 registration guard on its
    /// dependency count. The job reaches a ring only through
    /// `release_dependent` once the guard and every prerequisite are gone.
    fn submit_held(
        &self,
        func: JobFn,
        payload: Payload,
        ctx: *mut (),
        flags: SubmitFlags,
    ) -> Option<JobId> {
        let idx = match self.alloc_slot(flags, false) {
            SlotAlloc::Acquired(idx) => idx,
            _ => return None,
        };
        let id = self.prepare_slot(idx, func, payload, ctx, flags);
        let slot = &self.slots[idx];
        slot.dependency_count.store(1, Ordering::Release);
        slot.state.store(JobState::Held as u8, Ordering::Release);
        self.metrics.record_submit();
        self.active_jobs.fetch_add(1, Ordering::AcqRel);
        Some(id)
    }

    /// Runs a job to completion on the calling thread: worker loop, inline
    /// backpressure paths and fork-join help all funnel through here.
    pub(crate) fn execute(&self, id: JobId) {
        let idx = id.slot();
        let slot = &self.slots[idx];
        slot.state.store(JobState::Running as u8, Ordering::Release);
        let (func, payload, ctx, submitted_at) = {
            let mut data = slot.data.lock();
            (
                data.func.take(),
                std::mem::take(&mut data.payload),
                data.ctx,
                data.submitted_at.take(),
            )
        };
        if let Some(func) = func {
            let payload_ptr = payload.as_ptr();
            if panic::catch_unwind(AssertUnwindSafe(|| func(payload_ptr, ctx))).is_err() {
                // Treated as completion so dependents and waiters are not
                // stranded; the panic stops at the pool boundary.
                error!(job = %id, "job panicked");
            }
        }
        drop(payload);

        let dependents = self.graph.complete(slot, idx);
        slot.state.store(JobState::Completed as u8, Ordering::Release);
        self.metrics.record_completion(submitted_at);
        {
            let _data = slot.data.lock();
            slot.done.notify_all();
        }
        for dependent in dependents {
            self.release_dependent(dependent);
        }
        self.finish_one();
        self.recycle_slot(idx);
    }

    /// Drops one reference from a held job's dependency count; the
    /// decrement-to-zero transition makes it eligible and enqueues it.
    ///
    /// The decrement runs under the slot's data lock, pairing with the
    /// guard acquisition in `add_dependencies`: an observer holding the
    /// lock sees either a Held job whose count is still positive or the
    /// completed transition, never a torn state.
    pub(crate) fn release_dependent(&self, id: JobId) {
        let idx = id.slot();
        if idx >= self.slots.len() {
            return;
        }
        let slot = &self.slots[idx];
        let priority = {
            let data = slot.data.lock();
            if slot.generation.load(Ordering::Acquire) != id.generation() {
                return;
            }
            if slot.dependency_count.fetch_sub(1, Ordering::AcqRel) != 1 {
                return;
            }
            slot.state.store(JobState::Queued as u8, Ordering::Release);
            data.priority
        };
        let ring = match priority {
            Priority::High => &self.high,
            Priority::Low => &self.low,
        };
        if ring.try_push(id) {
            self.queued.fetch_add(1, Ordering::AcqRel);
            self.notify_new_work();
        } else {
            // Ring saturated: run it here rather than lose it.
            self.metrics.record_inline();
            self.execute(id);
        }
    }

    fn finish_one(&self) {
        if self.active_jobs.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _guard = self.idle_mutex.lock();
            self.idle_cond.notify_all();
        }
    }

    /// Returns a slot to the free list under a fresh generation. Any owned
    /// payload still in the record is dropped here.
    fn recycle_slot(&self, idx: usize) {
        let slot = &self.slots[idx];
        {
            let mut data = slot.data.lock();
            data.clear();
            let generation = slot.generation.load(Ordering::Relaxed);
            slot.generation
                .store(JobSlot::next_generation(generation), Ordering::Release);
            slot.is_completed.store(false, Ordering::Release);
            slot.dependency_count.store(0, Ordering::Release);
            slot.state.store(JobState::Free as u8, Ordering::Release);
            self.graph.reset(idx);
            // Late waiters observe the generation change.
            slot.done.notify_all();
        }
        self.free.lock().push(idx as u32);
        self.slot_freed.notify_one();
    }

    pub(crate) fn wait_for_job(&self, id: JobId) -> bool {
        if !id.is_valid() || id.slot() >= self.slots.len() {
            return false;
        }
        let slot = &self.slots[id.slot()];
        // O(1) fast path: the slot moved on, so this job already finished.
        if slot.generation.load(Ordering::Acquire) != id.generation() {
            return true;
        }
        let mut data = slot.data.lock();
        loop {
            if slot.is_completed.load(Ordering::Acquire) {
                return true;
            }
            if slot.generation.load(Ordering::Acquire) != id.generation() {
                return true;
            }
            if self.is_shutdown() {
                return slot.is_completed.load(Ordering::Acquire);
            }
            slot.done.wait(&mut data);
        }
    }

    fn wait_for_all(&self) -> Result<(), PoolError> {
        if worker::is_pool_thread() {
            return Err(PoolError::ThreadViolation);
        }
        let mut guard = self.idle_mutex.lock();
        while self.active_jobs.load(Ordering::Acquire) > 0 && !self.is_shutdown() {
            self.idle_cond.wait(&mut guard);
        }
        Ok(())
    }
}

/// A fixed-capacity, dual-priority job scheduler.
///
/// See the crate documentation for an overview and examples.
pub struct JobPool {
    shared: Arc<PoolShared>,
    workers: Vec<Worker>,
    io: Option<IoWorker>,
}

impl JobPool {
    /// Creates the pool, spawning every worker up front.
    ///
    /// Thread spawn failure is fatal: already-started threads are joined
    /// and no partially-initialized pool is returned.
    pub fn new(config: PoolConfig) -> Result<JobPool, PoolError> {
        let threads = config.threads.clamp(1, MAX_THREADS);
        let slot_count = config.max_jobs.clamp(1, MAX_SLOTS);
        let queue_capacity = config.queue_capacity.max(2).next_power_of_two();
        let shared = Arc::new(PoolShared::new(slot_count, queue_capacity));

        let mut workers = Vec::with_capacity(threads);
        for id in 0..threads {
            match Worker::spawn(id, Arc::clone(&shared), config.pin_workers) {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    Self::teardown(&shared, workers);
                    return Err(PoolError::ThreadCreation(e));
                }
            }
        }

        let io = if config.disable_io_thread {
            None
        } else {
            match IoWorker::spawn(config.io_poll_interval) {
                Ok(io) => Some(io),
                Err(e) => {
                    Self::teardown(&shared, workers);
                    return Err(PoolError::ThreadCreation(e));
                }
            }
        };

        Ok(JobPool {
            shared,
            workers,
            io,
        })
    }

    fn teardown(shared: &Arc<PoolShared>, workers: Vec<Worker>) {
        shared.shutdown.store(true, Ordering::Release);
        shared.wake_all_sleepers();
        for worker in workers {
            let _ = worker.join();
        }
    }

    /// Submits a job. The payload is copied: inline when it fits the
    /// 64-byte small-object buffer, onto the heap otherwise.
    ///
    /// Returns [`JobId::INVALID`] when the pool or the selected ring is at
    /// capacity and neither `BLOCK_IF_FULL` nor `RUN_IF_FULL` is set. With
    /// `RUN_IF_FULL` the job may have already executed, synchronously, by
    /// the time this returns.
    pub fn submit(&self, func: JobFn, payload: &[u8], ctx: *mut (), flags: SubmitFlags) -> JobId {
        debug_assert!(
            !flags.contains(SubmitFlags::POINTER_ONLY),
            "POINTER_ONLY payloads go through submit_borrowed"
        );
        self.shared
            .submit_job(func, Payload::copied(payload), ctx, flags)
    }

    /// Submits a job whose payload is caller-owned and only referenced.
    ///
    /// # Safety
    ///
    /// `payload` (and `ctx`, if dereferenced by `func`) must remain valid
    /// until the job has finished executing; at the latest, until
    /// [`wait_for_job`](Self::wait_for_job) on the returned id comes back
    /// true or the pool has shut down. The pool never reads through the
    /// pointer itself.
    pub unsafe fn submit_borrowed(
        &self,
        func: JobFn,
        payload: *const u8,
        ctx: *mut (),
        flags: SubmitFlags,
    ) -> JobId {
        self.shared.submit_job(
            func,
            Payload::Borrowed(payload),
            ctx,
            flags | SubmitFlags::POINTER_ONLY,
        )
    }

    /// Submits a job that stays held until every prerequisite in `prereqs`
    /// has completed. Prerequisites that already finished count as
    /// satisfied; if all of them have, the job is enqueued immediately.
    ///
    /// Fails with [`PoolError::DependencyCycle`] on a cycle or an
    /// over-deep chain, leaving no trace of the job behind, and with
    /// [`PoolError::QueueFull`] when no slot could be allocated.
    pub fn submit_dependent(
        &self,
        func: JobFn,
        payload: &[u8],
        ctx: *mut (),
        flags: SubmitFlags,
        prereqs: &[JobId],
    ) -> Result<JobId, PoolError> {
        let shared = &self.shared;
        if shared.is_shutdown() {
            return Ok(JobId::INVALID);
        }
        let id = match shared.submit_held(func, Payload::copied(payload), ctx, flags) {
            Some(id) => id,
            None => return Err(PoolError::QueueFull),
        };
        if let Err(e) = self.register_prereqs(prereqs, id) {
            // Nothing else references the job yet: drop the guard and the
            // slot without running it.
            shared.finish_one();
            shared.recycle_slot(id.slot());
            return Err(e);
        }
        // Drop the registration guard; enqueues when no prerequisite is
        // still pending.
        shared.release_dependent(id);
        Ok(id)
    }

    fn register_prereqs(&self, prereqs: &[JobId], dependent: JobId) -> Result<(), PoolError> {
        let shared = &self.shared;
        let mut registered: Vec<JobId> = Vec::new();
        for prereq in prereqs {
            match shared.graph.add_edge(&shared.slots, *prereq, dependent) {
                Ok(_) => registered.push(*prereq),
                Err(e) => {
                    for r in registered {
                        // A false return means the prereq's completion
                        // already drained the edge and decremented for us.
                        if shared.graph.remove_edge(r.slot(), dependent) {
                            shared.slots[dependent.slot()]
                                .dependency_count
                                .fetch_sub(1, Ordering::AcqRel);
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Makes `dependent` wait for `prereq`. Only jobs still held (created
    /// via [`submit_dependent`](Self::submit_dependent) and not yet
    /// released) can gain new prerequisites.
    pub fn add_dependency(&self, prereq: JobId, dependent: JobId) -> Result<(), PoolError> {
        self.add_dependencies(&[prereq], dependent)
    }

    /// Registers several prerequisites at once; the dependent becomes
    /// runnable only after each one independently completes.
    pub fn add_dependencies(&self, prereqs: &[JobId], dependent: JobId) -> Result<(), PoolError> {
        let shared = &self.shared;
        if !dependent.is_valid() || dependent.slot() >= shared.slots.len() {
            return Err(PoolError::StaleJob);
        }
        let slot = &shared.slots[dependent.slot()];
        {
            // Validate and take the registration guard under the data lock.
            // Recycling and the decrement-to-zero release both hold it, so
            // the +1 can only land on the job this handle actually names,
            // and a concurrent prerequisite completion cannot release the
            // job mid-registration.
            let _data = slot.data.lock();
            let held = slot.generation.load(Ordering::Acquire) == dependent.generation()
                && JobState::from_u8(slot.state.load(Ordering::Acquire)) == JobState::Held;
            if !held {
                return Err(PoolError::StaleJob);
            }
            slot.dependency_count.fetch_add(1, Ordering::AcqRel);
        }
        let result = self.register_prereqs(prereqs, dependent);
        shared.release_dependent(dependent);
        result
    }

    /// Blocks until the job identified by `id` has finished.
    ///
    /// Returns true immediately when the slot's generation no longer
    /// matches (the slot was recycled), which is the O(1) stale-handle
    /// check. Jobs discarded at shutdown are recycled too and therefore
    /// also resolve as complete; the discard is logged, never surfaced per
    /// waiter. Returns false for [`JobId::INVALID`].
    pub fn wait_for_job(&self, id: JobId) -> bool {
        self.shared.wait_for_job(id)
    }

    /// Blocks until the pool has no active jobs left.
    ///
    /// Errors with [`PoolError::ThreadViolation`] when called from a
    /// pool-owned thread, which could never observe the pool idle.
    pub fn wait_for_all_jobs(&self) -> Result<(), PoolError> {
        self.shared.wait_for_all()
    }

    /// Current depth of the (high, low) priority rings.
    pub fn queue_depths(&self) -> (usize, usize) {
        (self.shared.high.len(), self.shared.low.len())
    }

    /// Snapshot of the pool's diagnostic counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Jobs submitted but not yet completed (queued, held or running).
    pub fn active_jobs(&self) -> usize {
        self.shared.active_jobs.load(Ordering::Acquire)
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    pub(crate) fn shared(&self) -> &PoolShared {
        &self.shared
    }

    /// Writes a snapshot of every live job (id, state, priority, pending
    /// prerequisite count, dependents) to `out`, as JSON or indented text.
    /// Purely observational; scheduling state is not touched.
    pub fn dump_task_graph<W: Write>(&self, out: &mut W, as_json: bool) -> io::Result<()> {
        let shared = &self.shared;
        let mut jobs = Vec::new();
        for (idx, slot) in shared.slots.iter().enumerate() {
            let state = JobState::from_u8(slot.state.load(Ordering::Acquire));
            if state == JobState::Free {
                continue;
            }
            let generation = slot.generation.load(Ordering::Acquire);
            let priority = slot.data.lock().priority;
            jobs.push(TaskGraphJob {
                id: JobId::new(idx, generation).to_string(),
                state: state.name(),
                priority,
                dependency_count: slot.dependency_count.load(Ordering::Acquire),
                dependents: shared
                    .graph
                    .dependents_of(idx)
                    .into_iter()
                    .map(|d| d.to_string())
                    .collect(),
            });
        }
        let dump = TaskGraphDump {
            active_jobs: self.active_jobs(),
            queue_depth_high: shared.high.len(),
            queue_depth_low: shared.low.len(),
            jobs,
        };
        if as_json {
            serde_json::to_writer_pretty(&mut *out, &dump)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            writeln!(out)
        } else {
            writeln!(
                out,
                "task graph: {} active, queues high={} low={}",
                dump.active_jobs, dump.queue_depth_high, dump.queue_depth_low
            )?;
            for job in &dump.jobs {
                writeln!(
                    out,
                    "  {} [{}] {:?} deps={} -> {:?}",
                    job.id, job.state, job.priority, job.dependency_count, job.dependents
                )?;
            }
            Ok(())
        }
    }

    /// Routes an I/O request to the dedicated worker, or executes it
    /// synchronously on the caller when the worker is disabled.
    fn io_request(&self, req: IoRequest) {
        match &self.io {
            Some(io_worker) => {
                if let Err(req) = io_worker.send(req) {
                    crate::io::run_sync(req);
                }
            }
            None => crate::io::run_sync(req),
        }
    }

    /// Loads a file on the I/O worker and invokes `done` with the result.
    /// Runs synchronously on the caller when the I/O thread is disabled.
    pub fn request_file_load<F>(&self, path: impl Into<PathBuf>, done: F)
    where
        F: FnOnce(io::Result<Vec<u8>>) + Send + 'static,
    {
        self.io_request(IoRequest::Load {
            path: path.into(),
            done: Box::new(done),
        });
    }

    /// Writes `bytes` to `path` on the I/O worker. Synchronous fallback as
    /// with [`request_file_load`](Self::request_file_load).
    pub fn request_file_save<F>(&self, path: impl Into<PathBuf>, bytes: Vec<u8>, done: F)
    where
        F: FnOnce(io::Result<()>) + Send + 'static,
    {
        self.io_request(IoRequest::Save {
            path: path.into(),
            bytes,
            done: Box::new(done),
        });
    }

    /// Registers `path` for hot-reload polling; `changed` fires on the I/O
    /// thread when the file's mtime changes. Ignored (with a warning) when
    /// the I/O thread is disabled, since there is nothing to poll from.
    pub fn watch_file<F>(&self, path: impl Into<PathBuf>, changed: F)
    where
        F: Fn(&Path) + Send + 'static,
    {
        self.io_request(IoRequest::Watch {
            path: path.into(),
            changed: Box::new(changed),
        });
    }

    /// Stops polling `path`.
    pub fn unwatch_file(&self, path: impl Into<PathBuf>) {
        self.io_request(IoRequest::Unwatch { path: path.into() });
    }

    /// Stops accepting work, wakes every sleeper, joins all threads and
    /// discards anything still queued (owned payloads are released; the
    /// discard is logged, not surfaced per job).
    ///
    /// Errors with [`PoolError::ThreadViolation`] from a pool-owned thread;
    /// the pool is leaked in that case since joining would self-deadlock.
    pub fn shutdown(mut self) -> Result<(), PoolError> {
        if worker::is_pool_thread() {
            std::mem::forget(self);
            return Err(PoolError::ThreadViolation);
        }
        let panicked = self.shutdown_impl();
        if panicked > 0 {
            Err(PoolError::WorkersPanicked(panicked))
        } else {
            Ok(())
        }
    }

    fn shutdown_impl(&mut self) -> usize {
        let shared = Arc::clone(&self.shared);
        if shared.shutdown.swap(true, Ordering::AcqRel) {
            return 0;
        }
        shared.wake_all_sleepers();

        let mut panicked = 0;
        for worker in self.workers.drain(..) {
            let id = worker.id();
            if worker.join().is_err() {
                panicked += 1;
                error!(worker = id, "worker panicked");
            }
        }
        if let Some(mut io_worker) = self.io.take() {
            io_worker.shutdown();
        }

        // Everything still queued or held never ran; recycle the slots so
        // owned payloads drop and waiters resolve via the generation bump.
        let mut discarded: u64 = 0;
        for id in shared.high.drain().into_iter().chain(shared.low.drain()) {
            discarded += 1;
            shared.finish_one();
            shared.recycle_slot(id.slot());
        }
        for (idx, slot) in shared.slots.iter().enumerate() {
            if JobState::from_u8(slot.state.load(Ordering::Acquire)) == JobState::Held {
                discarded += 1;
                shared.finish_one();
                shared.recycle_slot(idx);
            }
        }
        if discarded > 0 {
            shared.metrics.record_discarded(discarded);
            warn!(discarded, "discarded queued jobs at shutdown");
        }
        // Anyone still blocked in wait_for_job re-checks and sees shutdown.
        for slot in shared.slots.iter() {
            let _data = slot.data.lock();
            slot.done.notify_all();
        }
        panicked
    }
}

impl Drop for JobPool {
    fn drop(&mut self) {
        if !self.shared.is_shutdown() && !worker::is_pool_thread() {
            self.shutdown_impl();
        }
    }
}

#[derive(Serialize)]
struct TaskGraphDump {
    active_jobs: usize,
    queue_depth_high: usize,
    queue_depth_low: usize,
    jobs: Vec<TaskGraphJob>,
}

#[derive(Serialize)]
struct TaskGraphJob {
    id: String,
    state: &'static str,
    priority: Priority,
    dependency_count: u32,
    dependents: Vec<String>,
}
