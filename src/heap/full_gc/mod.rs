//! Stop-the-world, parallel, compacting full collection.
//!
//! A collection runs these phases, each fully finished before the next
//! one starts:
//!
//! 1. Mark live objects, process references, clear weak roots and unload
//!    classes nobody uses anymore.
//! 2. Prepare compaction: classify regions, assign them to per-worker
//!    compaction points and compute the destination of every live object.
//!    Leftover tails are re-prepared serially, and under maximal
//!    compaction humongous objects get destinations too.
//! 3. Adjust pointers: rewrite every reference to a moving object.
//! 4. Compact: copy objects to their destinations.
//! 5. Reset metadata: scrub regions that were not compacted and reset the
//!    card table and remembered sets.
//!
//! Phases 3 and 4 are skipped when nothing is going to move.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use atomic::Atomic;
use parking_lot::Mutex;

pub mod adjust;
pub mod compact;
pub mod compaction_point;
pub mod forwarding;
pub mod marker;
pub mod preserved_marks;
pub mod prepare;
pub mod reference_processor;
pub mod reset_metadata;
pub mod scope;

use self::adjust::{AdjustTask, AdjustedSlots};
use self::compact::CompactionTask;
use self::compaction_point::CompactionPoint;
use self::forwarding::ForwardingTable;
use self::marker::{FullGCMarker, MarkingTask};
use self::preserved_marks::PreservedMarksSet;
use self::reference_processor::{ReferenceProcessor, ReferenceProcessorStats};
use self::reset_metadata::ResetMetadataTask;
use self::scope::FullGCScope;
use super::heap::Heap;
use super::mark_bitmap::MarkBitmap;
use super::region::HeapRegion;
use super::region_attr::RegionAttrTable;
use super::taskqueue::{MarkTask, TaskQueueSet};
use super::verifier;
use super::worker_policy::WorkerPolicy;
use super::{PhaseTimer, PhaseTimes};
use crate::formatted_size;
use crate::utils::percent_of;

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub enum GCCause {
    #[default]
    Explicit,
    AllocationFailure,
}

impl fmt::Display for GCCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GCCause::Explicit => write!(f, "System.gc()"),
            GCCause::AllocationFailure => write!(f, "G1 Compaction Pause"),
        }
    }
}

/// Collector states. Transitions only move forward.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[repr(u8)]
pub enum FullGCPhase {
    Idle,
    PrepareCollection,
    Mark,
    Verify,
    PrepareCompaction,
    Adjust,
    Compact,
    ResetMetadata,
    Complete,
}

#[derive(Clone, Default, Debug)]
pub struct FullGCStats {
    pub gc_id: usize,
    pub cause: GCCause,
    pub workers: usize,
    pub used_before: usize,
    pub used_after: usize,
    pub capacity: usize,
    pub regions_freed: usize,
    pub objects_marked: usize,
    pub live_words: usize,
    pub objects_moved: usize,
    pub humongous_moved: usize,
    /// Nothing had to move, phases 3 and 4 did not run.
    pub compaction_skipped: bool,
    pub serial_compaction: bool,
    pub humongous_compaction: bool,
    pub preserved_marks: usize,
    pub references: ReferenceProcessorStats,
    pub weak_roots_cleared: usize,
    pub classes_unloaded: usize,
    pub phase_times: Vec<(&'static str, Duration)>,
    pub pause: Duration,
}

/// A unit of parallel work. `work` runs once per active worker.
pub trait WorkerTask: Sync {
    fn name(&self) -> &'static str;
    fn work(&self, worker_id: usize);
}

/// Runs a full collection on `heap`.
pub fn collect(heap: &Heap, cause: GCCause, clear_soft_refs: bool, do_maximal_compaction: bool) -> FullGCStats {
    let _gc_guard = heap.gc_lock().lock();
    let gc_id = heap.increment_total_full_collections();
    let scope = FullGCScope::new(heap, gc_id, cause, clear_soft_refs, do_maximal_compaction);
    let workers = FullCollector::calc_active_workers(heap);

    let collector = FullCollector::new(heap, scope, workers);
    collector.prepare_collection();
    collector.collect();
    collector.complete_collection()
}

pub struct FullCollector<'h> {
    heap: &'h Heap,
    scope: FullGCScope,
    num_workers: usize,
    phase: Atomic<FullGCPhase>,

    region_attr_table: RegionAttrTable,
    live_stats: Box<[AtomicUsize]>,
    compaction_tops: Box<[AtomicUsize]>,

    markers: Box<[Mutex<FullGCMarker>]>,
    mark_queues: TaskQueueSet<MarkTask>,
    reference_processor: ReferenceProcessor,

    compaction_points: Box<[Mutex<CompactionPoint>]>,
    serial_compaction_point: Mutex<CompactionPoint>,
    humongous_compaction_point: Mutex<CompactionPoint>,
    humongous_compaction_regions: Mutex<Vec<usize>>,

    preserved_marks: PreservedMarksSet,
    forwarding: ForwardingTable,
    adjusted_slots: AdjustedSlots,

    has_compaction_targets: AtomicBool,
    has_humongous: AtomicBool,
    objects_moved: AtomicUsize,
    stats: Mutex<FullGCStats>,
    phase_times: PhaseTimes,
    free_regions_before: usize,
    #[cfg(test)]
    copy_log: Mutex<compact::CopyLog>,
}

impl<'h> FullCollector<'h> {
    pub fn calc_active_workers(heap: &Heap) -> usize {
        let opts = heap.options();
        let max_worker_count = heap.max_workers();
        if !opts.use_dynamic_number_of_gc_threads {
            let worker_count = heap.set_active_workers(max_worker_count);
            log::info!(target: "gc-task", "Using {} workers of {} for full compaction", worker_count, max_worker_count);
            return worker_count;
        }

        let heap_waste_worker_limit =
            WorkerPolicy::calc_heap_waste_worker_limit(heap.num_regions(), opts.heap_waste_percent)
                .min(max_worker_count);
        let active_worker_limit = WorkerPolicy::calc_default_active_workers(
            max_worker_count,
            heap.active_workers(),
            heap.mutator_threads(),
            heap.capacity(),
            opts.heap_size_per_gc_thread,
        );
        let used_worker_limit = heap.num_used_regions().max(1);

        let worker_count = heap_waste_worker_limit.min(active_worker_limit).min(used_worker_limit);
        log::debug!(
            target: "gc-task",
            "Requesting {} active workers for full compaction (waste limited workers: {}, adaptive workers: {}, used limited workers: {})",
            worker_count,
            heap_waste_worker_limit,
            active_worker_limit,
            used_worker_limit
        );
        let worker_count = heap.set_active_workers(worker_count);
        log::info!(target: "gc-task", "Using {} workers of {} for full compaction", worker_count, max_worker_count);
        worker_count
    }

    pub fn new(heap: &'h Heap, scope: FullGCScope, num_workers: usize) -> Self {
        assert!(
            num_workers >= 1 && num_workers <= heap.max_workers(),
            "{} workers requested, pool has {}",
            num_workers,
            heap.max_workers()
        );
        let opts = heap.options();
        let num_regions = heap.num_regions();

        let (mark_queues, queues) = TaskQueueSet::new(num_workers, opts.mark_queue_capacity);
        let markers = queues
            .into_iter()
            .enumerate()
            .map(|(worker_id, queue)| {
                Mutex::new(FullGCMarker::new(worker_id, queue, opts.obj_array_marking_stride))
            })
            .collect();

        let stats = FullGCStats {
            gc_id: scope.gc_id(),
            cause: scope.cause(),
            workers: num_workers,
            used_before: scope.used_before(),
            capacity: heap.capacity(),
            ..Default::default()
        };

        Self {
            heap,
            num_workers,
            phase: Atomic::new(FullGCPhase::Idle),
            region_attr_table: RegionAttrTable::new(num_regions, heap.base(), opts.region_size_bytes_shift),
            live_stats: (0..num_regions).map(|_| AtomicUsize::new(0)).collect(),
            compaction_tops: (0..num_regions).map(|_| AtomicUsize::new(0)).collect(),
            markers,
            mark_queues,
            reference_processor: ReferenceProcessor::new(scope.should_clear_soft_refs()),
            compaction_points: (0..num_workers).map(|_| Mutex::new(CompactionPoint::new())).collect(),
            serial_compaction_point: Mutex::new(CompactionPoint::new()),
            humongous_compaction_point: Mutex::new(CompactionPoint::new()),
            humongous_compaction_regions: Mutex::new(Vec::new()),
            preserved_marks: PreservedMarksSet::new(num_workers + 1),
            forwarding: ForwardingTable::new(opts.forwarding, heap.base(), opts.region_size_bytes_shift, num_regions),
            adjusted_slots: AdjustedSlots::new(heap.base(), (heap.end() - heap.base()) / super::object::WORD_SIZE),
            has_compaction_targets: AtomicBool::new(false),
            has_humongous: AtomicBool::new(false),
            objects_moved: AtomicUsize::new(0),
            stats: Mutex::new(stats),
            phase_times: PhaseTimes::default(),
            free_regions_before: heap.num_free_regions(),
            #[cfg(test)]
            copy_log: Mutex::new(Vec::new()),
            scope,
        }
    }

    pub fn heap(&self) -> &'h Heap {
        self.heap
    }

    pub fn scope(&self) -> &FullGCScope {
        &self.scope
    }

    pub fn workers(&self) -> usize {
        self.num_workers
    }

    pub fn phase(&self) -> FullGCPhase {
        self.phase.load(Ordering::Acquire)
    }

    fn advance(&self, next: FullGCPhase) {
        let current = self.phase();
        assert!(
            next > current,
            "full GC phase sequence violated: {:?} -> {:?}",
            current,
            next
        );
        log::trace!(target: "gc-phases", "GC({}) {:?} -> {:?}", self.scope.gc_id(), current, next);
        self.phase.store(next, Ordering::Release);
    }

    pub fn mark_bitmap(&self) -> &'h MarkBitmap {
        self.heap.mark_bitmap()
    }

    pub fn attr_table(&self) -> &RegionAttrTable {
        &self.region_attr_table
    }

    pub fn is_compaction_target(&self, region: usize) -> bool {
        self.region_attr_table.is_compaction_target(region)
    }

    pub fn is_compacting(&self, region: usize) -> bool {
        self.region_attr_table.is_compacting(region)
    }

    pub fn is_skip_compacting(&self, region: usize) -> bool {
        self.region_attr_table.is_skip_compacting(region)
    }

    pub fn is_free(&self, region: usize) -> bool {
        self.region_attr_table.is_free(region)
    }

    pub fn live_words(&self, region: usize) -> usize {
        self.live_stats[region].load(Ordering::Relaxed)
    }

    pub(crate) fn live_stats(&self) -> &[AtomicUsize] {
        &self.live_stats
    }

    pub fn compaction_top(&self, region: usize) -> usize {
        self.compaction_tops[region].load(Ordering::Relaxed)
    }

    pub fn set_compaction_top(&self, region: usize, top: usize) {
        self.compaction_tops[region].store(top, Ordering::Relaxed);
    }

    pub fn marker(&self, worker_id: usize) -> &Mutex<FullGCMarker> {
        &self.markers[worker_id]
    }

    pub fn mark_queues(&self) -> &TaskQueueSet<MarkTask> {
        &self.mark_queues
    }

    pub fn reference_processor(&self) -> &ReferenceProcessor {
        &self.reference_processor
    }

    pub fn compaction_point(&self, worker_id: usize) -> &Mutex<CompactionPoint> {
        &self.compaction_points[worker_id]
    }

    pub fn serial_compaction_point(&self) -> &Mutex<CompactionPoint> {
        &self.serial_compaction_point
    }

    pub fn humongous_compaction_point(&self) -> &Mutex<CompactionPoint> {
        &self.humongous_compaction_point
    }

    pub fn add_humongous_region(&self, region: usize) {
        self.humongous_compaction_regions.lock().push(region);
    }

    pub fn humongous_compaction_regions(&self) -> Vec<usize> {
        self.humongous_compaction_regions.lock().clone()
    }

    pub fn preserved_marks(&self) -> &PreservedMarksSet {
        &self.preserved_marks
    }

    /// Stack used by the orchestrator in serial phases.
    pub fn serial_preserved_marks(&self) -> &Mutex<preserved_marks::PreservedMarks> {
        self.preserved_marks.get(self.num_workers)
    }

    pub fn forwarding(&self) -> &ForwardingTable {
        &self.forwarding
    }

    pub fn adjusted_slots(&self) -> &AdjustedSlots {
        &self.adjusted_slots
    }

    pub fn has_compaction_targets(&self) -> bool {
        self.has_compaction_targets.load(Ordering::Acquire)
    }

    pub fn set_has_compaction_targets(&self) {
        self.has_compaction_targets.store(true, Ordering::Release);
    }

    pub fn has_humongous(&self) -> bool {
        self.has_humongous.load(Ordering::Acquire)
    }

    pub fn set_has_humongous(&self) {
        self.has_humongous.store(true, Ordering::Release);
    }

    pub(crate) fn count_moved(&self, objects: usize) {
        self.objects_moved.fetch_add(objects, Ordering::Relaxed);
    }

    /// Logs a copy. Other copies wait until the returned guard is dropped.
    #[cfg(test)]
    pub(crate) fn record_copy(
        &self,
        source: std::ops::Range<usize>,
        destination: std::ops::Range<usize>,
    ) -> parking_lot::MutexGuard<'_, compact::CopyLog> {
        let mut log = self.copy_log.lock();
        log.push((source, destination));
        log
    }

    fn phase_timer(&self, title: &'static str) -> PhaseTimer<'_> {
        PhaseTimer::recorded(self.scope.gc_id(), title, &self.phase_times)
    }

    pub(crate) fn sub_phase_timer(&self, title: &'static str) -> PhaseTimer<'static> {
        PhaseTimer::new(self.scope.gc_id(), title)
    }

    /// Runs `task` on every active worker and waits for all of them.
    pub fn run_task(&self, task: &dyn WorkerTask) {
        let n = self.num_workers;
        log::trace!(target: "gc-task", "GC({}) Running {} with {} workers", self.scope.gc_id(), task.name(), n);
        self.heap.workers().scoped(|scope| {
            for worker_id in 0..n {
                scope.execute(move || task.work(worker_id));
            }
        });
    }

    fn update_attribute_table(&self, region: &HeapRegion) {
        let index = region.index();
        if region.is_free() {
            self.region_attr_table.set_free(index);
        } else if region.is_archive() || region.is_humongous() || region.has_pinned_objects() {
            self.region_attr_table.set_skip_compacting(index);
        } else {
            self.region_attr_table.set_compacting(index);
        }
    }

    fn prepare_collection(&self) {
        self.advance(FullGCPhase::PrepareCollection);
        let heap = self.heap;
        log::debug!(target: "gc", "GC({}) Heap before GC: {}", self.scope.gc_id(), heap);

        if heap.options().verify.before_gc {
            verifier::verify_before_gc(heap);
        }

        heap.retire_alloc_region();
        debug_assert!(
            self.mark_bitmap().is_clear_range(heap.base(), heap.end()),
            "mark bitmap must be clear before a full collection"
        );
        heap.class_loader_data_graph().clear_claimed_marks();

        for region in heap.regions() {
            if region.is_young() {
                region.set_old();
            }
            self.update_attribute_table(region);
        }
        debug_assert!(self.region_attr_table.first_unclassified().is_none());
    }

    fn collect(&self) {
        self.phase1_mark_live_objects();
        if self.heap.options().verify.after_marking {
            self.advance(FullGCPhase::Verify);
            verifier::verify_after_marking(self.heap);
        }

        self.phase2_prepare_compaction();

        if self.has_compaction_targets() {
            self.phase3_adjust_pointers();
            self.phase4_do_compaction();
        } else {
            // All regions have a high live ratio, or are free, or are pinned. Nothing moves.
            log::info!(
                target: "gc-phases",
                "GC({}) No regions selected for compaction. Skipping Phase 3: Adjust pointers and Phase 4: Compact heap",
                self.scope.gc_id()
            );
            self.stats.lock().compaction_skipped = true;
        }

        self.phase5_reset_metadata();
    }

    fn phase1_mark_live_objects(&self) {
        self.advance(FullGCPhase::Mark);
        let _timer = self.phase_timer("Phase 1: Mark live objects");

        {
            let _timer = self.sub_phase_timer("Phase 1: Marking");
            let task = MarkingTask::new(self);
            self.run_task(&task);
        }

        {
            let _timer = self.sub_phase_timer("Phase 1: Reference Processing");
            let mut marker = self.markers[0].lock();
            let references = self.reference_processor.process_discovered_references(self, &mut marker);
            marker.flush_mark_stats_cache(&self.live_stats);
            self.stats.lock().references = references;
        }
        assert!(self.mark_queues.is_empty(), "marking must be complete before weak processing");

        {
            let _timer = self.sub_phase_timer("Phase 1: Weak Processing");
            let cleared = self
                .heap
                .weak_roots()
                .iter()
                .map(|weak| weak.weak_oops_do(self.mark_bitmap()))
                .sum::<usize>();
            log::debug!(target: "gc-ref", "GC({}) Weak roots cleared: {}", self.scope.gc_id(), cleared);
            self.stats.lock().weak_roots_cleared = cleared;
        }

        {
            let _timer = self.sub_phase_timer("Phase 1: Class Unloading");
            let unloaded = self.heap.class_loader_data_graph().do_unloading();
            self.stats.lock().classes_unloaded = unloaded;
        }

        let objects_marked = self.markers.iter().map(|m| m.lock().objects_marked()).sum::<usize>();
        let live_words = self.live_stats.iter().map(|w| w.load(Ordering::Relaxed)).sum::<usize>();
        log::debug!(
            target: "gc-phases",
            "GC({}) Marked {} objects, {} live ({:.1}% of used)",
            self.scope.gc_id(),
            objects_marked,
            formatted_size(live_words * super::object::WORD_SIZE),
            percent_of(live_words * super::object::WORD_SIZE, self.scope.used_before())
        );
        let mut stats = self.stats.lock();
        stats.objects_marked = objects_marked;
        stats.live_words = live_words;
    }

    fn phase2_prepare_compaction(&self) {
        self.advance(FullGCPhase::PrepareCompaction);
        let _timer = self.phase_timer("Phase 2: Prepare compaction");

        prepare::determine_compaction_queues(self);

        let maximal = self.scope.do_maximal_compaction();
        if !self.has_compaction_targets() && !(maximal && self.has_humongous()) {
            return;
        }

        let has_free_compaction_targets = prepare::forward_oops(self);

        // Try to avoid running out of memory right after the collection when
        // the tails of the compaction queues left free space stranded.
        if prepare::needs_serial_compaction(self, has_free_compaction_targets) {
            if prepare::prepare_serial_compaction(self) {
                self.stats.lock().serial_compaction = true;
            }
            if maximal && self.has_humongous() && self.serial_compaction_point.lock().has_regions() {
                prepare::prepare_humongous_compaction(self);
            }
        }
    }

    fn phase3_adjust_pointers(&self) {
        self.advance(FullGCPhase::Adjust);
        let _timer = self.phase_timer("Phase 3: Adjust pointers");
        self.adjusted_slots.clear();
        let task = AdjustTask::new(self);
        self.run_task(&task);
    }

    fn phase4_do_compaction(&self) {
        self.advance(FullGCPhase::Compact);
        let _timer = self.phase_timer("Phase 4: Compact heap");
        let task = CompactionTask::new(self);
        self.run_task(&task);

        // Serial tail regions may receive objects from regions the parallel
        // workers just vacated, so this strictly follows the parallel pass.
        if self.serial_compaction_point.lock().has_regions() {
            task.serial_compaction();
        }

        let humongous = self.humongous_compaction_regions();
        if !humongous.is_empty() {
            task.humongous_compaction(&humongous);
            let mut stats = self.stats.lock();
            stats.humongous_compaction = true;
            stats.humongous_moved = humongous.len();
        }
    }

    fn phase5_reset_metadata(&self) {
        self.advance(FullGCPhase::ResetMetadata);
        let _timer = self.phase_timer("Phase 5: Reset Metadata");
        let task = ResetMetadataTask::new(self);
        self.run_task(&task);
        log::debug!(
            target: "gc-phases",
            "GC({}) Scrubbed {} dead ranges in skip-compacting regions",
            self.scope.gc_id(),
            task.scrubbed_ranges()
        );
    }

    fn complete_collection(self) -> FullGCStats {
        self.advance(FullGCPhase::Complete);
        let heap = self.heap;

        let preserved = self.preserved_marks.restore();
        self.forwarding.clear();
        heap.class_loader_data_graph().clear_claimed_marks();
        self.mark_bitmap().clear_all();
        heap.prepare_for_mutator_after_full_collection();

        if heap.options().verify.after_gc {
            verifier::verify_after_gc(heap);
        }

        log::debug!(target: "gc", "GC({}) Heap after GC: {}", self.scope.gc_id(), heap);
        heap.print_heap_summary();
        let pause = self.scope.log_pause(heap);

        let mut stats = self.stats.into_inner();
        stats.used_after = heap.used();
        stats.regions_freed = heap.num_free_regions().saturating_sub(self.free_regions_before);
        stats.objects_moved = self.objects_moved.load(Ordering::Relaxed);
        stats.preserved_marks = preserved;
        stats.phase_times = self.phase_times.into_inner();
        stats.pause = pause;
        stats
    }
}

#[cfg(test)]
mod tests;
