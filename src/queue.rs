//! Fixed-capacity ring buffers holding ready job ids.
//!
//! The pool owns two of these, one per priority tier. Capacity is a power of
//! two fixed at creation; head/tail only grow and wrap through a mask.
//! Enqueue and dequeue both run under the queue-local lock, keeping critical
//! sections to an index update and a slot write.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::job::JobId;

struct Ring {
    buf: Box<[JobId]>,
    head: usize,
    tail: usize,
}

impl Ring {
    fn len(&self) -> usize {
        self.tail - self.head
    }
}

pub(crate) struct RingQueue {
    inner: Mutex<Ring>,
    /// Signaled on dequeue; BLOCK_IF_FULL submitters sleep here.
    space: Condvar,
    capacity: usize,
    mask: usize,
}

impl RingQueue {
    /// `capacity` must be a power of two (the pool rounds up before calling).
    pub(crate) fn new(capacity: usize) -> RingQueue {
        assert!(capacity.is_power_of_two());
        RingQueue {
            inner: Mutex::new(Ring {
                buf: vec![JobId::INVALID; capacity].into_boxed_slice(),
                head: 0,
                tail: 0,
            }),
            space: Condvar::new(),
            capacity,
            mask: capacity - 1,
        }
    }

    /// Non-blocking enqueue. False when the ring is at capacity.
    pub(crate) fn try_push(&self, id: JobId) -> bool {
        let mut ring = self.inner.lock();
        if ring.len() == self.capacity {
            return false;
        }
        let at = ring.tail & self.mask;
        ring.buf[at] = id;
        ring.tail += 1;
        true
    }

    /// Blocking enqueue; waits on the space condition until a slot frees.
    /// Returns false if `shutdown` flips while waiting.
    pub(crate) fn push_blocking(&self, id: JobId, shutdown: &AtomicBool) -> bool {
        let mut ring = self.inner.lock();
        while ring.len() == self.capacity {
            if shutdown.load(Ordering::Acquire) {
                return false;
            }
            self.space.wait(&mut ring);
        }
        let at = ring.tail & self.mask;
        ring.buf[at] = id;
        ring.tail += 1;
        true
    }

    pub(crate) fn try_pop(&self) -> Option<JobId> {
        let mut ring = self.inner.lock();
        if ring.len() == 0 {
            return None;
        }
        let at = ring.head & self.mask;
        let id = ring.buf[at];
        ring.head += 1;
        drop(ring);
        self.space.notify_one();
        Some(id)
    }

    /// Empties the ring, returning everything that was queued. Used by
    /// shutdown to discard unstarted work.
    pub(crate) fn drain(&self) -> Vec<JobId> {
        let mut ring = self.inner.lock();
        let mut out = Vec::with_capacity(ring.len());
        while ring.len() > 0 {
            let at = ring.head & self.mask;
            out.push(ring.buf[at]);
            ring.head += 1;
        }
        drop(ring);
        self.space.notify_all();
        out
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Wakes every blocked submitter; used when the pool shuts down.
    pub(crate) fn wake_all(&self) {
        self.space.notify_all();
    }
}
