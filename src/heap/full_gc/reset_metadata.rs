//! Phase 5: leave every region in a state the mutator and the next
//! collection can work with.

use std::sync::atomic::{AtomicUsize, Ordering};

use super::{FullCollector, WorkerTask};
use crate::heap::object::Oop;
use crate::heap::region::HeapRegion;
use crate::heap::HeapRegionClaimer;

pub struct ResetMetadataTask<'a, 'h> {
    collector: &'a FullCollector<'h>,
    claimer: HeapRegionClaimer,
    scrubbed: AtomicUsize,
}

impl<'a, 'h> ResetMetadataTask<'a, 'h> {
    pub fn new(collector: &'a FullCollector<'h>) -> Self {
        Self {
            collector,
            claimer: HeapRegionClaimer::new(collector.workers(), collector.heap().num_regions()),
            scrubbed: AtomicUsize::new(0),
        }
    }

    pub fn scrubbed_ranges(&self) -> usize {
        self.scrubbed.load(Ordering::Relaxed)
    }

    /// Overwrites the dead objects between live ones with fillers so that
    /// the region stays parsable without the mark bitmap.
    fn scrub_skip_compacting_region(&self, region: &HeapRegion) {
        let heap = self.collector.heap();
        let bitmap = self.collector.mark_bitmap();
        let limit = region.top();
        let mut cur = region.bottom();
        let mut scrubbed = 0;
        while cur < limit {
            let next_live = bitmap.get_next_marked_addr(cur, limit);
            if next_live > cur {
                region.fill_range_with_dead_objects(heap.block_offset_table(), cur, next_live);
                scrubbed += 1;
            }
            if next_live >= limit {
                break;
            }
            cur = Oop::from_address(next_live).end();
        }
        if scrubbed > 0 {
            log::trace!(target: "gc-phases", "Phase 5: scrubbed {} dead ranges in {:?}", scrubbed, region);
            self.scrubbed.fetch_add(scrubbed, Ordering::Relaxed);
        }
    }

    fn reset_region(&self, region: &HeapRegion) {
        let collector = self.collector;
        let heap = collector.heap();
        let index = region.index();

        if !collector.is_compaction_target(index) {
            assert!(!region.is_free(), "free {:?} must be a compaction target", region);
            debug_assert!(collector.is_skip_compacting(index));
            if region.is_old() {
                self.scrub_skip_compacting_region(region);
            }
            // Compaction cleared the marks of moved objects, these never moved.
            collector.mark_bitmap().clear_range(region.bottom(), region.end());
            region.reset_skip_compacting_after_full_gc();
        }

        heap.card_table().clear_range(region.bottom(), region.end());
        heap.remset(index).clear();
    }
}

impl WorkerTask for ResetMetadataTask<'_, '_> {
    fn name(&self) -> &'static str {
        "Full GC Reset Metadata"
    }

    fn work(&self, worker_id: usize) {
        self.collector.heap().heap_region_par_iterate_from_worker_offset(
            &mut |region: &HeapRegion| {
                self.reset_region(region);
                false
            },
            &self.claimer,
            worker_id,
        );
    }
}
