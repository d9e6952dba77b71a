//! Soft, weak, final and phantom reference handling.
//!
//! While marking, reference objects whose referent is not (yet) known to be
//! live are discovered instead of traced through. After the transitive
//! closure is complete the discovered lists are processed one type at a
//! time, strongest first:
//!
//! * soft, weak and phantom references to dead referents are cleared and
//!   put on the heap's pending list,
//! * final references keep their referent (and everything it reaches) alive
//!   and are put on the pending list with the referent intact.
//!
//! Soft references are only discovered when the collection is asked to
//! clear them. Otherwise their referents are treated as strongly reachable.

use crossbeam_queue::SegQueue;

use super::marker::FullGCMarker;
use super::FullCollector;
use crate::heap::object::{Oop, ReferenceType};

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct ReferenceProcessorStats {
    discovered: [usize; 4],
    pub cleared: usize,
    pub enqueued: usize,
}

impl ReferenceProcessorStats {
    pub fn discovered(&self, rt: ReferenceType) -> usize {
        self.discovered[index(rt)]
    }

    pub fn total_discovered(&self) -> usize {
        self.discovered.iter().sum()
    }
}

const fn index(rt: ReferenceType) -> usize {
    match rt {
        ReferenceType::Soft => 0,
        ReferenceType::Weak => 1,
        ReferenceType::Final => 2,
        ReferenceType::Phantom => 3,
    }
}

pub struct ReferenceProcessor {
    clear_soft_refs: bool,
    discovered: [SegQueue<Oop>; 4],
}

impl ReferenceProcessor {
    pub fn new(clear_soft_refs: bool) -> Self {
        Self {
            clear_soft_refs,
            discovered: Default::default(),
        }
    }

    pub fn clear_soft_refs(&self) -> bool {
        self.clear_soft_refs
    }

    /// Records `obj` for processing after marking. Returns false when the
    /// referent must be traced as an ordinary strong field.
    pub fn discover(&self, collector: &FullCollector<'_>, obj: Oop, rt: ReferenceType) -> bool {
        if rt == ReferenceType::Soft && !self.clear_soft_refs {
            return false;
        }
        let referent = obj.referent_slot().load();
        if referent.is_null() || collector.mark_bitmap().is_marked_oop(referent) {
            return false;
        }
        self.discovered[index(rt)].push(obj);
        true
    }

    pub fn num_discovered(&self, rt: ReferenceType) -> usize {
        self.discovered[index(rt)].len()
    }

    /// Clears every reference of type `rt` whose referent is still unmarked.
    fn process_clearing(
        &self,
        collector: &FullCollector<'_>,
        rt: ReferenceType,
        stats: &mut ReferenceProcessorStats,
    ) {
        let bitmap = collector.mark_bitmap();
        let pending_list = collector.heap().reference_pending_list();
        while let Some(reference) = self.discovered[index(rt)].pop() {
            stats.discovered[index(rt)] += 1;
            let slot = reference.referent_slot();
            let referent = slot.load();
            if referent.is_null() || bitmap.is_marked_oop(referent) {
                continue;
            }
            slot.store(Oop::NULL);
            pending_list.push(reference);
            stats.cleared += 1;
            stats.enqueued += 1;
        }
    }

    /// Resurrects referents of final references and enqueues the references.
    fn process_final(
        &self,
        collector: &FullCollector<'_>,
        marker: &mut FullGCMarker,
        stats: &mut ReferenceProcessorStats,
    ) {
        let bitmap = collector.mark_bitmap();
        let pending_list = collector.heap().reference_pending_list();
        while let Some(reference) = self.discovered[index(ReferenceType::Final)].pop() {
            stats.discovered[index(ReferenceType::Final)] += 1;
            let slot = reference.referent_slot();
            let referent = slot.load();
            if referent.is_null() || bitmap.is_marked_oop(referent) {
                continue;
            }
            marker.mark_and_push(collector, slot);
            pending_list.push(reference);
            stats.enqueued += 1;
        }
        marker.drain_stack(collector);
    }

    pub fn process_discovered_references(
        &self,
        collector: &FullCollector<'_>,
        marker: &mut FullGCMarker,
    ) -> ReferenceProcessorStats {
        let mut stats = ReferenceProcessorStats::default();

        // Keeping final referents alive can discover more references, so
        // repeat until nothing stronger than phantom is left.
        loop {
            self.process_clearing(collector, ReferenceType::Soft, &mut stats);
            self.process_clearing(collector, ReferenceType::Weak, &mut stats);
            self.process_final(collector, marker, &mut stats);
            if self.discovered[..=index(ReferenceType::Final)]
                .iter()
                .all(|queue| queue.is_empty())
            {
                break;
            }
        }
        self.process_clearing(collector, ReferenceType::Phantom, &mut stats);

        log::debug!(
            target: "gc-ref",
            "GC({}) Reference Processing: Soft: {} Weak: {} Final: {} Phantom: {} (cleared {}, enqueued {})",
            collector.scope().gc_id(),
            stats.discovered(ReferenceType::Soft),
            stats.discovered(ReferenceType::Weak),
            stats.discovered(ReferenceType::Final),
            stats.discovered(ReferenceType::Phantom),
            stats.cleared,
            stats.enqueued
        );
        stats
    }
}
