//! Phase 3: point every reference at the future location of its target.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{FullCollector, WorkerTask};
use crate::heap::class_loader_data::ClaimKind;
use crate::heap::mark_bitmap::MarkBitmap;
use crate::heap::object::{Oop, OopClosure, Slot};
use crate::heap::region::HeapRegion;
use crate::heap::root_processor::{Root, RootProcessor, RootTask};
use crate::heap::HeapRegionClaimer;

/// Slots already rewritten in this collection. A rewritten slot holds a
/// new address that may equal the old address of another moving object,
/// so it must never be looked up again.
pub struct AdjustedSlots {
    heap_slots: MarkBitmap,
    root_slots: Mutex<HashSet<usize>>,
}

impl AdjustedSlots {
    pub fn new(start: usize, covered_words: usize) -> Self {
        Self {
            heap_slots: MarkBitmap::new(start, covered_words),
            root_slots: Mutex::new(HashSet::new()),
        }
    }

    fn covers(&self, slot: Slot) -> bool {
        slot.address() >= self.heap_slots.start() && slot.address() < self.heap_slots.end()
    }

    pub fn is_adjusted(&self, slot: Slot) -> bool {
        if self.covers(slot) {
            self.heap_slots.is_marked(slot.address())
        } else {
            self.root_slots.lock().contains(&slot.address())
        }
    }

    /// Returns true iff this call is the first to claim `slot`.
    pub fn claim(&self, slot: Slot) -> bool {
        if self.covers(slot) {
            self.heap_slots.par_mark(slot.address())
        } else {
            self.root_slots.lock().insert(slot.address())
        }
    }

    pub fn clear(&self) {
        self.heap_slots.clear_all();
        self.root_slots.lock().clear();
    }
}

/// Rewrites a slot whose target is forwarded. Targets in regions that do
/// not move are left alone without consulting the forwarding table.
pub struct AdjustClosure<'a, 'h> {
    collector: &'a FullCollector<'h>,
}

impl<'a, 'h> AdjustClosure<'a, 'h> {
    pub fn new(collector: &'a FullCollector<'h>) -> Self {
        Self { collector }
    }

    pub fn adjust(&self, slot: Slot) {
        let adjusted = self.collector.adjusted_slots();
        if adjusted.is_adjusted(slot) {
            return;
        }
        let obj = slot.load();
        if obj.is_null() || !self.collector.attr_table().is_compacting_addr(obj.address()) {
            return;
        }
        if let Some(forwardee) = self.collector.forwarding().forwardee(obj) {
            if adjusted.claim(slot) {
                slot.store(forwardee);
            }
        }
    }
}

impl OopClosure for AdjustClosure<'_, '_> {
    fn do_oop(&mut self, slot: Slot) {
        self.adjust(slot);
    }
}

pub struct AdjustTask<'a, 'h> {
    collector: &'a FullCollector<'h>,
    root_processor: RootProcessor<'a>,
    references_done: AtomicBool,
    claimer: HeapRegionClaimer,
}

impl<'a, 'h> AdjustTask<'a, 'h> {
    pub fn new(collector: &'a FullCollector<'h>) -> Self {
        let heap = collector.heap();
        let mut tasks = heap.roots().into_iter().map(RootTask::Root).collect::<Vec<_>>();
        tasks.extend(
            heap.weak_roots()
                .into_iter()
                .map(|weak| RootTask::Root(weak as Arc<dyn Root>)),
        );
        tasks.push(RootTask::ClassLoaderData {
            graph: heap.class_loader_data_graph(),
            claim: ClaimKind::Adjust,
            strong_only: false,
        });
        Self {
            collector,
            root_processor: RootProcessor::new(tasks),
            references_done: AtomicBool::new(false),
            claimer: HeapRegionClaimer::new(collector.workers(), heap.num_regions()),
        }
    }

    fn adjust_region(&self, region: &HeapRegion, closure: &mut AdjustClosure<'_, '_>) {
        let collector = self.collector;
        let bitmap = collector.mark_bitmap();
        if region.is_humongous() {
            // Each region of a humongous object adjusts the slots it holds.
            let start = collector.heap().region(region.humongous_start_region());
            let obj = Oop::from_address(start.bottom());
            if bitmap.is_marked_oop(obj) {
                obj.oop_iterate_bounded(closure, region.bottom(), region.top());
            }
        } else if !collector.is_free(region.index()) {
            region.apply_to_marked_objects(bitmap, |obj| {
                obj.oop_iterate(closure);
                obj.size()
            });
        }
    }
}

impl WorkerTask for AdjustTask<'_, '_> {
    fn name(&self) -> &'static str {
        "Full GC Adjust"
    }

    fn work(&self, worker_id: usize) {
        let collector = self.collector;
        let heap = collector.heap();
        let mut closure = AdjustClosure::new(collector);

        // Preserved marks follow their objects.
        let stacks = collector.preserved_marks();
        for index in (worker_id..stacks.num()).step_by(collector.workers()) {
            stacks.get(index).lock().adjust_during_full_gc(collector.forwarding());
        }

        if !self.references_done.swap(true, Ordering::AcqRel) {
            heap.reference_pending_list().oops_do(&mut closure);
        }

        self.root_processor.process(worker_id, &mut closure);

        heap.heap_region_par_iterate_from_worker_offset(
            &mut |region: &HeapRegion| {
                self.adjust_region(region, &mut closure);
                false
            },
            &self.claimer,
            worker_id,
        );
    }
}
