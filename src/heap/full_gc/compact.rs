//! Phase 4: move objects to their destinations.

#[cfg(test)]
use std::ops::Range;

use super::forwarding::ForwardingMode;
use super::{FullCollector, WorkerTask};
use crate::heap::object::Oop;
#[cfg(test)]
use crate::heap::object::WORD_SIZE;

/// Source and destination byte ranges of every copy, in execution order.
#[cfg(test)]
pub(crate) type CopyLog = Vec<(Range<usize>, Range<usize>)>;

pub struct CompactionTask<'a, 'h> {
    collector: &'a FullCollector<'h>,
}

impl<'a, 'h> CompactionTask<'a, 'h> {
    pub fn new(collector: &'a FullCollector<'h>) -> Self {
        Self { collector }
    }

    /// Copies `obj` to its forwardee. Overlapping ranges are fine, the
    /// destination never lies above the source.
    fn copy_object_to_new_location(&self, obj: Oop, destination: Oop) {
        debug_assert!(destination.address() < obj.address(), "{:?} would move up to {:?}", obj, destination);
        let size = obj.size();
        #[cfg(test)]
        let _copying = self.collector.record_copy(
            obj.address()..obj.address() + size * WORD_SIZE,
            destination.address()..destination.address() + size * WORD_SIZE,
        );
        unsafe {
            std::ptr::copy(obj.address() as *const usize, destination.address() as *mut usize, size);
        }
        if self.collector.forwarding().mode() == ForwardingMode::InHeader {
            destination.init_mark();
        }
    }

    fn compact_region(&self, index: usize) {
        let collector = self.collector;
        let heap = collector.heap();
        let bitmap = collector.mark_bitmap();
        let forwarding = collector.forwarding();
        let region = heap.region(index);
        assert!(!region.has_pinned_objects(), "pinned {:?} in a compaction queue", region);
        assert!(!region.is_humongous(), "humongous {:?} in a compaction queue", region);

        if !collector.is_free(index) {
            let mut moved = 0;
            region.apply_to_marked_objects(bitmap, |obj| {
                let size = obj.size();
                if let Some(destination) = forwarding.forwardee(obj) {
                    self.copy_object_to_new_location(obj, destination);
                    moved += 1;
                }
                // the bitmap is clean again once compaction is done
                bitmap.clear(obj.address());
                size
            });
            collector.count_moved(moved);
        }
        region.reset_compacted_after_full_gc(collector.compaction_top(index));
    }

    /// Compacts the regions of the serial compaction point.
    pub fn serial_compaction(&self) {
        let _timer = self.collector.sub_phase_timer("Phase 4: Serial Compaction");
        let regions = self.collector.serial_compaction_point().lock().regions().to_vec();
        for index in regions {
            self.compact_region(index);
        }
    }

    /// Moves the humongous objects starting in `regions`.
    pub fn humongous_compaction(&self, regions: &[usize]) {
        let _timer = self.collector.sub_phase_timer("Phase 4: Humongous Compaction");
        for &start in regions {
            assert!(self.collector.is_compaction_target(start), "humongous region {} is not a compaction target", start);
            self.compact_humongous_obj(start);
        }
    }

    fn compact_humongous_obj(&self, src_start: usize) {
        let collector = self.collector;
        let heap = collector.heap();
        let region = heap.region(src_start);
        assert!(region.is_starts_humongous(), "{:?} does not start a humongous object", region);

        let obj = Oop::from_address(region.bottom());
        let word_size = obj.size();
        let num = heap.options().required_regions(word_size);
        let destination = match collector.forwarding().forwardee(obj) {
            Some(destination) => destination,
            None => panic!("humongous {:?} queued for compaction without a destination", obj),
        };
        assert!(collector.mark_bitmap().is_marked_oop(obj), "only live humongous objects move");
        collector.mark_bitmap().clear(obj.address());

        self.copy_object_to_new_location(obj, destination);

        let dest_start = heap.region_index_for(destination.address());
        heap.set_humongous_metadata(dest_start, num, word_size);
        self.free_non_overlapping_regions(src_start, dest_start, num);
        collector.count_moved(1);
    }

    fn free_non_overlapping_regions(&self, src_start: usize, dest_start: usize, num: usize) {
        let heap = self.collector.heap();
        let dest_end = dest_start + num - 1;
        let src_end = src_start + num - 1;
        let non_overlapping_start = if dest_end < src_start { src_start } else { dest_end + 1 };
        for index in non_overlapping_start..=src_end {
            heap.free_region(index);
        }
    }
}

impl WorkerTask for CompactionTask<'_, '_> {
    fn name(&self) -> &'static str {
        "Full GC Compact"
    }

    fn work(&self, worker_id: usize) {
        let regions = self.collector.compaction_point(worker_id).lock().regions().to_vec();
        for index in regions {
            self.compact_region(index);
        }
    }
}
