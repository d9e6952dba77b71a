use std::sync::atomic::{AtomicUsize, Ordering};

use super::{FullCollector, WorkerTask};
use crate::heap::class_loader_data::ClaimKind;
use crate::heap::object::{ObjectKind, Oop, OopClosure, Slot, NO_CLASS};
use crate::heap::root_processor::{RootProcessor, RootTask};
use crate::heap::taskqueue::{MarkTask, TaskQueue, TaskTerminator};

/// Direct mapped cache of per-region live word counts. Keeps workers from
/// hammering the shared counters for every object they mark.
pub struct RegionMarkStatsCache {
    entries: Box<[(usize, usize)]>,
    mask: usize,
}

impl RegionMarkStatsCache {
    const EMPTY: usize = usize::MAX;

    pub fn new(size: usize) -> Self {
        let size = size.next_power_of_two();
        Self {
            entries: vec![(Self::EMPTY, 0); size].into_boxed_slice(),
            mask: size - 1,
        }
    }

    pub fn add_live_words(&mut self, region: usize, words: usize, stats: &[AtomicUsize]) {
        let entry = &mut self.entries[region & self.mask];
        if entry.0 != region {
            if entry.0 != Self::EMPTY {
                stats[entry.0].fetch_add(entry.1, Ordering::Relaxed);
            }
            *entry = (region, 0);
        }
        entry.1 += words;
    }

    pub fn evict_all(&mut self, stats: &[AtomicUsize]) {
        for entry in self.entries.iter_mut() {
            if entry.0 != Self::EMPTY {
                stats[entry.0].fetch_add(entry.1, Ordering::Relaxed);
                *entry = (Self::EMPTY, 0);
            }
        }
    }
}

/// Per-worker marking state.
pub struct FullGCMarker {
    worker_id: usize,
    queue: TaskQueue<MarkTask>,
    stats_cache: RegionMarkStatsCache,
    objects_marked: usize,
    stride: usize,
}

impl FullGCMarker {
    const STATS_CACHE_SIZE: usize = 1024;

    pub fn new(worker_id: usize, queue: TaskQueue<MarkTask>, stride: usize) -> Self {
        Self {
            worker_id,
            queue,
            stats_cache: RegionMarkStatsCache::new(Self::STATS_CACHE_SIZE),
            objects_marked: 0,
            stride,
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn objects_marked(&self) -> usize {
        self.objects_marked
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Marks `obj`. Returns false if some worker marked it before.
    pub fn mark_object(&mut self, collector: &FullCollector<'_>, obj: Oop) -> bool {
        if !collector.mark_bitmap().par_mark(obj.address()) {
            return false;
        }
        self.objects_marked += 1;

        let heap = collector.heap();
        let region = heap.region_index_for(obj.address());
        self.stats_cache.add_live_words(region, obj.size(), collector.live_stats());

        // An instance keeps its class loader alive.
        let class = obj.class_id();
        if class != NO_CLASS {
            if let Some(cld) = heap.class_loader_data_graph().try_claim(class, ClaimKind::Mark) {
                cld.oops_do(&mut MarkAndPushClosure::new(self, collector));
            }
        }
        true
    }

    pub fn mark_and_push(&mut self, collector: &FullCollector<'_>, slot: Slot) {
        let obj = slot.load();
        if obj.is_null() {
            return;
        }
        debug_assert!(collector.heap().is_in(obj.address()), "{:?} in {:?} points outside the heap", obj, slot);
        if self.mark_object(collector, obj) {
            self.queue.push(collector.mark_queues(), MarkTask::Oop(obj));
        }
    }

    fn follow_object(&mut self, collector: &FullCollector<'_>, obj: Oop) {
        match obj.kind() {
            ObjectKind::ObjArray => self.follow_array_chunk(collector, obj, 0, obj.num_ref_fields()),
            ObjectKind::Reference(rt) => {
                if !collector.reference_processor().discover(collector, obj, rt) {
                    self.mark_and_push(collector, obj.referent_slot());
                }
                obj.oop_iterate_no_referent(&mut MarkAndPushClosure::new(self, collector));
            }
            _ => obj.oop_iterate(&mut MarkAndPushClosure::new(self, collector)),
        }
    }

    /// Scans elements `[from, from + stride)` and pushes the remainder as a
    /// continuation before doing so, so that other workers can steal it.
    fn follow_array_chunk(&mut self, collector: &FullCollector<'_>, array: Oop, from: usize, to: usize) {
        let end = to.min(from + self.stride);
        if end < to {
            self.queue
                .push(collector.mark_queues(), MarkTask::PartialArray { array, from: end, to });
        }
        array.oop_iterate_range(&mut MarkAndPushClosure::new(self, collector), from, end);
    }

    fn process(&mut self, collector: &FullCollector<'_>, task: MarkTask) {
        match task {
            MarkTask::Oop(obj) => self.follow_object(collector, obj),
            MarkTask::PartialArray { array, from, to } => self.follow_array_chunk(collector, array, from, to),
        }
    }

    pub fn drain_stack(&mut self, collector: &FullCollector<'_>) {
        loop {
            while let Some(task) = self.queue.pop() {
                self.process(collector, task);
            }
            match collector.mark_queues().pop_overflow(&self.queue) {
                Some(task) => self.process(collector, task),
                None => break,
            }
        }
    }

    pub fn complete_marking(&mut self, collector: &FullCollector<'_>, terminator: &TaskTerminator) {
        loop {
            self.drain_stack(collector);
            if let Some(task) = collector.mark_queues().steal(&self.queue) {
                self.process(collector, task);
                continue;
            }
            if terminator.offer_termination(|| !collector.mark_queues().is_empty()) {
                break;
            }
        }
        debug_assert!(self.queue.is_empty());
    }

    pub fn flush_mark_stats_cache(&mut self, stats: &[AtomicUsize]) {
        self.stats_cache.evict_all(stats);
    }
}

pub struct MarkAndPushClosure<'a, 'h> {
    marker: &'a mut FullGCMarker,
    collector: &'a FullCollector<'h>,
}

impl<'a, 'h> MarkAndPushClosure<'a, 'h> {
    pub fn new(marker: &'a mut FullGCMarker, collector: &'a FullCollector<'h>) -> Self {
        Self { marker, collector }
    }
}

impl OopClosure for MarkAndPushClosure<'_, '_> {
    fn do_oop(&mut self, slot: Slot) {
        self.marker.mark_and_push(self.collector, slot);
    }
}

/// Marks everything reachable from the strong roots.
pub struct MarkingTask<'a, 'h> {
    collector: &'a FullCollector<'h>,
    root_processor: RootProcessor<'a>,
    terminator: TaskTerminator,
}

impl<'a, 'h> MarkingTask<'a, 'h> {
    pub fn new(collector: &'a FullCollector<'h>) -> Self {
        let heap = collector.heap();
        let mut tasks = heap.roots().into_iter().map(RootTask::Root).collect::<Vec<_>>();
        tasks.push(RootTask::Handles(heap.reference_pending_list()));
        tasks.push(RootTask::ClassLoaderData {
            graph: heap.class_loader_data_graph(),
            claim: ClaimKind::Mark,
            strong_only: true,
        });
        Self {
            collector,
            root_processor: RootProcessor::new(tasks),
            terminator: TaskTerminator::new(collector.workers()),
        }
    }
}

impl WorkerTask for MarkingTask<'_, '_> {
    fn name(&self) -> &'static str {
        "Full GC Mark"
    }

    fn work(&self, worker_id: usize) {
        let collector = self.collector;
        let mut marker = collector.marker(worker_id).lock();
        self.root_processor
            .process(worker_id, &mut MarkAndPushClosure::new(&mut marker, collector));
        marker.complete_marking(collector, &self.terminator);
        marker.flush_mark_stats_cache(collector.live_stats());
        log::trace!(
            target: "gc-task",
            "GC({}) Worker {} marked {} objects",
            collector.scope().gc_id(),
            worker_id,
            marker.objects_marked()
        );
    }
}
