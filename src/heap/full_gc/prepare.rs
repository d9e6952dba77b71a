//! Phase 2: decide which regions move and where every live object goes.

use std::sync::atomic::{AtomicBool, Ordering};

use super::{FullCollector, WorkerTask};
use crate::heap::object::Oop;
use crate::heap::region::HeapRegion;
use crate::heap::HeapRegionClosure;

/// Sorts every region into compacting, skip-compacting or free and deals
/// the compaction targets out to the workers' compaction points.
struct DetermineCompactionQueue<'a, 'h> {
    collector: &'a FullCollector<'h>,
    threshold: usize,
    cur_worker: usize,
}

impl<'a, 'h> DetermineCompactionQueue<'a, 'h> {
    fn new(collector: &'a FullCollector<'h>) -> Self {
        Self {
            collector,
            threshold: collector.scope().region_compaction_threshold(),
            cur_worker: 0,
        }
    }

    fn should_compact(&self, region: &HeapRegion) -> bool {
        if region.is_humongous() || region.is_archive() || region.has_pinned_objects() {
            return false;
        }
        self.collector.live_words(region.index()) <= self.threshold
    }

    fn add_to_compaction_queue(&mut self, region: &HeapRegion) {
        let collector = self.collector;
        collector.set_compaction_top(region.index(), region.bottom());
        let mut cp = collector.compaction_point(self.cur_worker).lock();
        self.cur_worker = (self.cur_worker + 1) % collector.workers();
        cp.add(region.index());
        if !cp.is_initialized() {
            cp.initialize(collector, region.index());
        }
    }

    fn free_empty_humongous_region(&mut self, region: &HeapRegion) {
        let collector = self.collector;
        let start = region.index();
        let num = collector.heap().free_humongous_region(start);
        // The remaining regions of the object are picked up as free regions
        // when the iteration reaches them.
        for index in start..start + num {
            collector.attr_table().set_free(index);
        }
        log::trace!(target: "gc-phases", "Phase 2: freed dead humongous object in regions [{}, {}]", start, start + num - 1);
        self.add_to_compaction_queue(region);
    }

    fn free_open_archive_region(&mut self, region: &HeapRegion) {
        self.collector.heap().free_region(region.index());
        self.collector.attr_table().set_free(region.index());
        self.add_to_compaction_queue(region);
    }
}

impl HeapRegionClosure for DetermineCompactionQueue<'_, '_> {
    fn do_heap_region(&mut self, region: &HeapRegion) -> bool {
        let collector = self.collector;
        let index = region.index();

        if self.should_compact(region) {
            if !collector.is_free(index) {
                collector.set_has_compaction_targets();
            }
            self.add_to_compaction_queue(region);
            return false;
        }

        if region.is_starts_humongous() {
            let obj = Oop::from_address(region.bottom());
            if collector.mark_bitmap().is_marked_oop(obj) {
                collector.set_has_humongous();
            } else {
                self.free_empty_humongous_region(region);
            }
        } else if region.is_continues_humongous() {
            debug_assert!(collector.is_skip_compacting(index));
        } else if region.is_open_archive() {
            if collector.live_words(index) == 0 {
                self.free_open_archive_region(region);
            }
        } else if region.is_closed_archive() {
            // never touched
        } else {
            collector.attr_table().set_skip_compacting(index);
            log::trace!(
                target: "gc-phases",
                "Phase 2: skip compaction region index: {}, live words: {}",
                index,
                collector.live_words(index)
            );
        }
        false
    }
}

/// Phase 2a.
pub fn determine_compaction_queues(collector: &FullCollector<'_>) {
    let _timer = collector.sub_phase_timer("Phase 2: Determine compaction queue");
    let mut closure = DetermineCompactionQueue::new(collector);
    collector.heap().heap_region_iterate(&mut closure);
    debug_assert!(collector.attr_table().first_unclassified().is_none());
}

/// Computes destinations for the live objects of one worker's compaction
/// targets, in the order the targets were queued.
struct PrepareTask<'a, 'h> {
    collector: &'a FullCollector<'h>,
    has_free_compaction_targets: AtomicBool,
}

impl WorkerTask for PrepareTask<'_, '_> {
    fn name(&self) -> &'static str {
        "Full GC Prepare"
    }

    fn work(&self, worker_id: usize) {
        let collector = self.collector;
        let heap = collector.heap();
        let bitmap = collector.mark_bitmap();
        let mut cp = collector.compaction_point(worker_id).lock();
        let mut preserved = collector.preserved_marks().get(worker_id).lock();

        for index in cp.regions().to_vec() {
            let region = heap.region(index);
            assert!(collector.is_compaction_target(index), "{:?} is not a compaction target", region);
            assert!(!region.has_pinned_objects(), "pinned {:?} queued for compaction", region);
            if collector.is_free(index) {
                continue;
            }
            region.apply_to_marked_objects(bitmap, |obj| {
                let size = obj.size();
                cp.forward(collector, obj, size, &mut preserved);
                size
            });
        }
        cp.update(collector);

        // Unused targets remain when the point stopped before its last region.
        if cp.has_regions() && cp.current_region() != cp.regions().last().copied() {
            self.has_free_compaction_targets.store(true, Ordering::Relaxed);
        }
    }
}

/// Phase 2b. Returns whether some compaction point has targets left over.
pub fn forward_oops(collector: &FullCollector<'_>) -> bool {
    let _timer = collector.sub_phase_timer("Phase 2: Forward oops");
    let task = PrepareTask {
        collector,
        has_free_compaction_targets: AtomicBool::new(false),
    };
    collector.run_task(&task);
    task.has_free_compaction_targets.load(Ordering::Relaxed)
}

/// Whether the tails of the compaction points have to be re-prepared
/// serially to avoid stranding free space between them.
pub fn needs_serial_compaction(collector: &FullCollector<'_>, has_free_compaction_targets: bool) -> bool {
    if collector.scope().do_maximal_compaction() || !has_free_compaction_targets {
        return true;
    }

    let heap = collector.heap();
    let mut points_with_regions = 0;
    let mut has_leftover = false;
    for worker_id in 0..collector.workers() {
        if let Some(current) = collector.compaction_point(worker_id).lock().current_region() {
            points_with_regions += 1;
            has_leftover |= collector.compaction_top(current) < heap.region(current).end();
        }
    }
    points_with_regions > 1 && has_leftover
}

/// Cuts every parallel compaction point at the lowest of their current
/// regions and returns that region.
fn truncate_parallel_cps(collector: &FullCollector<'_>) -> Option<usize> {
    let lowest_current = (0..collector.workers())
        .filter_map(|worker_id| collector.compaction_point(worker_id).lock().current_region())
        .min()?;
    for worker_id in 0..collector.workers() {
        let mut cp = collector.compaction_point(worker_id).lock();
        if cp.has_regions() {
            cp.remove_at_or_above(lowest_current);
        }
    }
    Some(lowest_current)
}

/// Phase 2c. Re-forwards every object at or above the lowest current region
/// of the parallel compaction points through the serial compaction point.
/// Returns false when there was nothing to re-prepare.
pub fn prepare_serial_compaction(collector: &FullCollector<'_>) -> bool {
    let _timer = collector.sub_phase_timer("Phase 2: Prepare serial compaction");
    let start = match truncate_parallel_cps(collector) {
        Some(start) => start,
        None => return false,
    };

    let heap = collector.heap();
    let bitmap = collector.mark_bitmap();
    let forwarding = collector.forwarding();
    let mut serial_cp = collector.serial_compaction_point().lock();
    assert!(!serial_cp.is_initialized(), "serial compaction point used twice");
    serial_cp.add(start);
    serial_cp.initialize(collector, start);

    // Objects already placed below this address keep their destination.
    let dense_prefix_top = collector.compaction_top(start);
    let mut preserved = collector.serial_preserved_marks().lock();

    for index in start + 1..heap.num_regions() {
        if !collector.is_compaction_target(index) {
            continue;
        }
        let region = heap.region(index);
        collector.set_compaction_top(index, region.bottom());
        serial_cp.add(index);
        region.apply_to_marked_objects(bitmap, |obj| {
            let size = obj.size();
            if let Some(forwardee) = forwarding.forwardee(obj) {
                if forwardee.address() < dense_prefix_top {
                    return size;
                }
            }
            serial_cp.forward(collector, obj, size, &mut preserved);
            size
        });
    }
    serial_cp.update(collector);

    log::debug!(
        target: "gc-phases",
        "GC({}) Serial compaction from region {} over {} regions",
        collector.scope().gc_id(),
        start,
        serial_cp.regions().len()
    );
    true
}

/// Phase 2d. Finds destinations for movable humongous objects above the
/// last region the serial compaction point filled.
pub fn prepare_humongous_compaction(collector: &FullCollector<'_>) {
    let _timer = collector.sub_phase_timer("Phase 2: Prepare humongous compaction");
    let last_serial_target = match collector.serial_compaction_point().lock().current_region() {
        Some(region) => region,
        None => return,
    };

    let heap = collector.heap();
    let mut humongous_cp = collector.humongous_compaction_point().lock();
    let mut preserved = collector.serial_preserved_marks().lock();

    let mut index = last_serial_target + 1;
    while index < heap.num_regions() {
        let region = heap.region(index);
        if region.is_starts_humongous() {
            let num = heap
                .options()
                .required_regions(Oop::from_address(region.bottom()).size());
            // Even a maximal compaction leaves pinned objects alone.
            if !region.has_pinned_objects() && humongous_cp.forward_humongous(collector, index, &mut preserved) {
                collector.set_has_compaction_targets();
            }
            index += num;
            continue;
        }
        if collector.is_compaction_target(index) {
            assert!(!region.has_pinned_objects(), "pinned {:?} is a compaction target", region);
            humongous_cp.add(index);
        }
        index += 1;
    }
}
