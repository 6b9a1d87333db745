//! Inter-job dependency tracking.
//!
//! The graph is owned by the pool and kept outside the fixed-size job
//! record: each slot has an adjacency list of dependent ids, so one
//! prerequisite can release any number of dependents. Registration and
//! completion serialize on the prerequisite's adjacency lock, which is also
//! where the completion flag is published, so an edge is either drained by
//! the completing worker or rejected as already satisfied, never lost.

use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;

use crate::error::PoolError;
use crate::job::{JobId, JobSlot, MAX_DEPENDENCY_DEPTH};

struct GraphNode {
    /// Jobs to release when this slot's job completes.
    dependents: Mutex<Vec<JobId>>,
    /// Longest registered chain ending at this slot.
    depth: AtomicU8,
}

pub(crate) struct DependencyGraph {
    nodes: Box<[GraphNode]>,
    /// Serializes edge registration so two concurrent adds cannot weave an
    /// undetected cycle between the walk and the insert.
    reg_lock: Mutex<()>,
}

impl DependencyGraph {
    pub(crate) fn new(slots: usize) -> DependencyGraph {
        DependencyGraph {
            nodes: (0..slots)
                .map(|_| GraphNode {
                    dependents: Mutex::new(Vec::new()),
                    depth: AtomicU8::new(0),
                })
                .collect::<Vec<_>>()
                .into_boxed_slice(),
            reg_lock: Mutex::new(()),
        }
    }

    /// Registers `dependent` to be released by `prereq`'s completion.
    ///
    /// Returns `Ok(true)` when the edge was registered and the dependent's
    /// count incremented, `Ok(false)` when the prerequisite has already
    /// finished (nothing to wait for). The caller must hold a registration
    /// guard on the dependent's count so a racing release cannot fire
    /// mid-registration.
    pub(crate) fn add_edge(
        &self,
        slots: &[JobSlot],
        prereq: JobId,
        dependent: JobId,
    ) -> Result<bool, PoolError> {
        if !prereq.is_valid() || !dependent.is_valid() {
            return Err(PoolError::StaleJob);
        }
        let (p, d) = (prereq.slot(), dependent.slot());
        if p >= slots.len() || d >= slots.len() {
            return Err(PoolError::StaleJob);
        }
        if slots[d].generation.load(Ordering::Acquire) != dependent.generation() {
            return Err(PoolError::StaleJob);
        }

        let _reg = self.reg_lock.lock();

        // Prereq slot recycled: that job finished long ago. Checked before
        // the self-edge test, since a finished prerequisite's slot may have
        // been reallocated to the dependent itself.
        if slots[p].generation.load(Ordering::Acquire) != prereq.generation() {
            return Ok(false);
        }
        if p == d {
            return Err(PoolError::DependencyCycle);
        }
        let new_depth = self.nodes[p].depth.load(Ordering::Relaxed).saturating_add(1);
        if new_depth > MAX_DEPENDENCY_DEPTH {
            return Err(PoolError::DependencyCycle);
        }
        if self.reaches(d, prereq) {
            return Err(PoolError::DependencyCycle);
        }

        let mut list = self.nodes[p].dependents.lock();
        if slots[p].is_completed.load(Ordering::Acquire) {
            return Ok(false);
        }
        list.push(dependent);
        drop(list);

        self.nodes[d].depth.fetch_max(new_depth, Ordering::Relaxed);
        slots[d].dependency_count.fetch_add(1, Ordering::AcqRel);
        Ok(true)
    }

    /// Removes a previously registered edge. Returns false when the edge is
    /// gone because the prerequisite's completion already drained it (in
    /// which case the dependent's count was decremented by that path).
    pub(crate) fn remove_edge(&self, prereq_slot: usize, dependent: JobId) -> bool {
        let mut list = self.nodes[prereq_slot].dependents.lock();
        if let Some(pos) = list.iter().position(|id| *id == dependent) {
            list.swap_remove(pos);
            true
        } else {
            false
        }
    }

    /// Publishes completion and takes the dependents to release.
    ///
    /// The completed flag is stored under the adjacency lock, so no edge can
    /// be added after the drain: `add_edge` re-checks the flag under the
    /// same lock. This is the happens-before edge between a prerequisite's
    /// completion and its dependents becoming eligible.
    pub(crate) fn complete(&self, slot: &JobSlot, idx: usize) -> Vec<JobId> {
        let mut list = self.nodes[idx].dependents.lock();
        slot.is_completed.store(true, Ordering::Release);
        std::mem::take(&mut *list)
    }

    /// Clears per-slot graph state when the slot is recycled.
    pub(crate) fn reset(&self, idx: usize) {
        self.nodes[idx].dependents.lock().clear();
        self.nodes[idx].depth.store(0, Ordering::Relaxed);
    }

    /// Snapshot of a slot's dependents, for diagnostics only.
    pub(crate) fn dependents_of(&self, idx: usize) -> Vec<JobId> {
        self.nodes[idx].dependents.lock().clone()
    }

    /// True when `target` is reachable from slot `from` along dependent
    /// edges. Takes one adjacency lock at a time; never nests them.
    fn reaches(&self, from: usize, target: JobId) -> bool {
        let mut visited = vec![from];
        let mut stack = vec![from];
        while let Some(s) = stack.pop() {
            let next: Vec<JobId> = self.nodes[s].dependents.lock().clone();
            for id in next {
                if id == target {
                    return true;
                }
                let slot = id.slot();
                if slot < self.nodes.len() && !visited.contains(&slot) {
                    visited.push(slot);
                    stack.push(slot);
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobSlot;

    fn slots(n: usize) -> Vec<JobSlot> {
        (0..n).map(|_| JobSlot::new()).collect()
    }

    fn id(slot: usize) -> JobId {
        JobId::new(slot, 1)
    }

    #[test]
    fn test_edge_increments_count() {
        let slots = slots(4);
        let graph = DependencyGraph::new(4);
        assert!(matches!(graph.add_edge(&slots, id(0), id(1)), Ok(true)));
        assert_eq!(slots[1].dependency_count.load(Ordering::SeqCst), 1);
        assert_eq!(graph.dependents_of(0), vec![id(1)]);
    }

    #[test]
    fn test_self_dependency_rejected() {
        let slots = slots(2);
        let graph = DependencyGraph::new(2);
        assert!(matches!(
            graph.add_edge(&slots, id(0), id(0)),
            Err(PoolError::DependencyCycle)
        ));
    }

    #[test]
    fn test_recycled_prereq_in_dependent_slot_is_satisfied() {
        let slots = slots(2);
        let graph = DependencyGraph::new(2);
        // Slot 0's previous occupant finished and the slot was reallocated
        // to the dependent. The old handle names a completed job, not a
        // self-dependency.
        slots[0].generation.store(2, Ordering::SeqCst);
        let finished = JobId::new(0, 1);
        let current = JobId::new(0, 2);
        assert!(matches!(graph.add_edge(&slots, finished, current), Ok(false)));
        assert_eq!(slots[0].dependency_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_direct_cycle_rejected() {
        let slots = slots(2);
        let graph = DependencyGraph::new(2);
        graph.add_edge(&slots, id(0), id(1)).unwrap();
        assert!(matches!(
            graph.add_edge(&slots, id(1), id(0)),
            Err(PoolError::DependencyCycle)
        ));
    }

    #[test]
    fn test_transitive_cycle_rejected() {
        let slots = slots(3);
        let graph = DependencyGraph::new(3);
        graph.add_edge(&slots, id(0), id(1)).unwrap();
        graph.add_edge(&slots, id(1), id(2)).unwrap();
        assert!(matches!(
            graph.add_edge(&slots, id(2), id(0)),
            Err(PoolError::DependencyCycle)
        ));
    }

    #[test]
    fn test_depth_limit() {
        let n = MAX_DEPENDENCY_DEPTH as usize + 2;
        let slots = slots(n);
        let graph = DependencyGraph::new(n);
        for i in 0..MAX_DEPENDENCY_DEPTH as usize {
            graph.add_edge(&slots, id(i), id(i + 1)).unwrap();
        }
        let last = MAX_DEPENDENCY_DEPTH as usize;
        assert!(matches!(
            graph.add_edge(&slots, id(last), id(last + 1)),
            Err(PoolError::DependencyCycle)
        ));
    }

    #[test]
    fn test_completed_prereq_is_noop() {
        let slots = slots(2);
        let graph = DependencyGraph::new(2);
        let drained = graph.complete(&slots[0], 0);
        assert!(drained.is_empty());
        assert!(matches!(graph.add_edge(&slots, id(0), id(1)), Ok(false)));
        assert_eq!(slots[1].dependency_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stale_handles_rejected() {
        let slots = slots(2);
        let graph = DependencyGraph::new(2);
        let stale_dependent = JobId::new(1, 9);
        assert!(matches!(
            graph.add_edge(&slots, id(0), stale_dependent),
            Err(PoolError::StaleJob)
        ));
        // A stale prereq means that job already finished: trivially satisfied.
        let stale_prereq = JobId::new(0, 9);
        assert!(matches!(graph.add_edge(&slots, stale_prereq, id(1)), Ok(false)));
    }

    #[test]
    fn test_complete_drains_and_blocks_new_edges() {
        let slots = slots(3);
        let graph = DependencyGraph::new(3);
        graph.add_edge(&slots, id(0), id(1)).unwrap();
        graph.add_edge(&slots, id(0), id(2)).unwrap();
        let drained = graph.complete(&slots[0], 0);
        assert_eq!(drained.len(), 2);
        assert!(matches!(graph.add_edge(&slots, id(0), id(1)), Ok(false)));
    }

    #[test]
    fn test_remove_edge() {
        let slots = slots(2);
        let graph = DependencyGraph::new(2);
        graph.add_edge(&slots, id(0), id(1)).unwrap();
        assert!(graph.remove_edge(0, id(1)));
        assert!(!graph.remove_edge(0, id(1)));
        assert!(graph.dependents_of(0).is_empty());
    }
}
