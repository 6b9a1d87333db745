//! Job records, generational handles, submission flags and payloads.
//!
//! Each job occupies a fixed slot in the pool. The slot is reused across
//! submissions; a 16-bit generation counter folded into the public [`JobId`]
//! detects stale handles in O(1) without a completion history log.

use std::fmt;
use std::ops::BitOr;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

/// Inline payload capacity in bytes. Payloads at or below this size are
/// stored inside the job record, avoiding a heap allocation.
pub const INLINE_PAYLOAD: usize = 64;

/// Upper bound on dependency chain depth. Registration past this depth is
/// rejected as a structural error.
pub const MAX_DEPENDENCY_DEPTH: u8 = 32;

/// Upper bound on compute worker threads per pool.
pub const MAX_THREADS: usize = 64;

/// Upper bound on job slots per pool; the slot index must fit in the low
/// 16 bits of a [`JobId`].
pub const MAX_SLOTS: usize = 65_536;

/// Job callback: receives the payload pointer and the user context pointer.
///
/// The payload pointer is valid for the duration of the call. For inline and
/// copied payloads it points at pool-owned bytes; for borrowed submissions it
/// is exactly the pointer the caller handed in.
pub type JobFn = fn(*const u8, *mut ());

/// Opaque 32-bit job handle: `generation << 16 | slot_index`.
///
/// Generations start at 1 and skip 0 when wrapping, so no valid handle ever
/// equals [`JobId::INVALID`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct JobId(u32);

impl JobId {
    /// The rejected-submission sentinel.
    pub const INVALID: JobId = JobId(0);

    pub(crate) fn new(slot: usize, generation: u32) -> Self {
        JobId(((generation & 0xFFFF) << 16) | (slot as u32 & 0xFFFF))
    }

    /// Slot index encoded in this handle.
    pub fn slot(self) -> usize {
        (self.0 & 0xFFFF) as usize
    }

    /// Generation encoded in this handle.
    pub fn generation(self) -> u32 {
        self.0 >> 16
    }

    /// False only for [`JobId::INVALID`].
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// The raw 32-bit representation.
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.slot(), self.generation())
    }
}

/// Scheduling tier. Workers always drain `High` before `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Priority {
    /// Latency-sensitive work (simulation, logic).
    High,
    /// Throughput/background work (assets, I/O staging).
    #[default]
    Low,
}

/// Submission flag bit-field.
///
/// The default (`NONE`) is low priority, reject when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubmitFlags(u32);

impl SubmitFlags {
    /// Low priority, fail on a full queue.
    pub const NONE: SubmitFlags = SubmitFlags(0);
    /// Enqueue into the high-priority ring.
    pub const HIGH_PRIORITY: SubmitFlags = SubmitFlags(1);
    /// Block the caller until queue/slot space frees. Only safe from
    /// threads that are provably not pool workers.
    pub const BLOCK_IF_FULL: SubmitFlags = SubmitFlags(1 << 1);
    /// Execute synchronously on the calling thread when full, bypassing the
    /// queue entirely.
    pub const RUN_IF_FULL: SubmitFlags = SubmitFlags(1 << 2);
    /// The payload is caller-owned and merely referenced; it must outlive
    /// execution. Set through [`crate::JobPool::submit_borrowed`].
    pub const POINTER_ONLY: SubmitFlags = SubmitFlags(1 << 3);

    /// True if every bit of `other` is set in `self`.
    pub fn contains(self, other: SubmitFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// The priority tier these flags select.
    pub fn priority(self) -> Priority {
        if self.contains(SubmitFlags::HIGH_PRIORITY) {
            Priority::High
        } else {
            Priority::Low
        }
    }
}

impl BitOr for SubmitFlags {
    type Output = SubmitFlags;

    fn bitor(self, rhs: SubmitFlags) -> SubmitFlags {
        SubmitFlags(self.0 | rhs.0)
    }
}

/// Lifecycle states of a job slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum JobState {
    Free = 0,
    /// Allocated but held out of both rings by unresolved dependencies.
    Held = 1,
    Queued = 2,
    Running = 3,
    Completed = 4,
}

impl JobState {
    pub(crate) fn from_u8(v: u8) -> JobState {
        match v {
            1 => JobState::Held,
            2 => JobState::Queued,
            3 => JobState::Running,
            4 => JobState::Completed,
            _ => JobState::Free,
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            JobState::Free => "free",
            JobState::Held => "held",
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
        }
    }
}

/// Payload storage. A tagged union instead of a raw pointer plus ownership
/// flags, so every ownership state is exhaustively checkable.
pub(crate) enum Payload {
    Empty,
    /// Small-object optimization: bytes live inside the job record.
    Inline { buf: [u8; INLINE_PAYLOAD], len: usize },
    /// Copied large payload, freed when the record is recycled.
    Owned(Box<[u8]>),
    /// Caller-owned memory; the pool only reads the pointer.
    Borrowed(*const u8),
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Empty
    }
}

impl Payload {
    /// Copies `bytes` inline when they fit, onto the heap otherwise.
    pub(crate) fn copied(bytes: &[u8]) -> Payload {
        if bytes.is_empty() {
            Payload::Empty
        } else if bytes.len() <= INLINE_PAYLOAD {
            let mut buf = [0u8; INLINE_PAYLOAD];
            buf[..bytes.len()].copy_from_slice(bytes);
            Payload::Inline {
                buf,
                len: bytes.len(),
            }
        } else {
            Payload::Owned(bytes.into())
        }
    }

    pub(crate) fn as_ptr(&self) -> *const u8 {
        match self {
            Payload::Empty => ptr::null(),
            Payload::Inline { buf, .. } => buf.as_ptr(),
            Payload::Owned(b) => b.as_ptr(),
            Payload::Borrowed(p) => *p,
        }
    }
}

/// Mutable slot contents, written by the submitter while it exclusively
/// holds the slot and read by the executing worker.
pub(crate) struct SlotData {
    pub(crate) func: Option<JobFn>,
    pub(crate) payload: Payload,
    pub(crate) ctx: *mut (),
    pub(crate) priority: Priority,
    pub(crate) submitted_at: Option<Instant>,
}

// Borrowed payloads and context pointers cross threads by contract: the
// submitter guarantees they outlive execution (see `submit_borrowed`).
unsafe impl Send for SlotData {}

impl SlotData {
    fn empty() -> SlotData {
        SlotData {
            func: None,
            payload: Payload::Empty,
            ctx: ptr::null_mut(),
            priority: Priority::Low,
            submitted_at: None,
        }
    }

    pub(crate) fn clear(&mut self) {
        *self = SlotData::empty();
    }
}

/// One reusable job record.
pub(crate) struct JobSlot {
    /// Low 16 bits used; only ever increases (mod 2^16, skipping 0).
    pub(crate) generation: AtomicU32,
    pub(crate) state: AtomicU8,
    /// Remaining unresolved prerequisites plus any registration guard.
    pub(crate) dependency_count: AtomicU32,
    /// Set exactly once per submission, read by waiters.
    pub(crate) is_completed: AtomicBool,
    pub(crate) data: Mutex<SlotData>,
    /// Signaled when the job completes or the slot is recycled.
    pub(crate) done: Condvar,
}

impl JobSlot {
    pub(crate) fn new() -> JobSlot {
        JobSlot {
            generation: AtomicU32::new(1),
            state: AtomicU8::new(JobState::Free as u8),
            dependency_count: AtomicU32::new(0),
            is_completed: AtomicBool::new(false),
            data: Mutex::new(SlotData::empty()),
            done: Condvar::new(),
        }
    }

    /// Next generation value after `current`, skipping the 0 sentinel.
    pub(crate) fn next_generation(current: u32) -> u32 {
        let next = (current + 1) & 0xFFFF;
        if next == 0 {
            1
        } else {
            next
        }
    }
}
