use std::time::{Duration, Instant};

use super::GCCause;
use crate::formatted_size;
use crate::heap::heap::Heap;

/// Values fixed for the duration of one full collection.
pub struct FullGCScope {
    gc_id: usize,
    cause: GCCause,
    clear_soft_refs: bool,
    do_maximal_compaction: bool,
    region_compaction_threshold: usize,
    used_before: usize,
    start: Instant,
}

impl FullGCScope {
    pub fn new(
        heap: &Heap,
        gc_id: usize,
        cause: GCCause,
        clear_soft_refs: bool,
        do_maximal_compaction: bool,
    ) -> Self {
        let region_words = heap.options().region_size_words;
        let region_compaction_threshold = if do_maximal_compaction {
            region_words
        } else {
            region_words * (100 - heap.options().mark_sweep_dead_ratio) / 100
        };
        Self {
            gc_id,
            cause,
            clear_soft_refs,
            do_maximal_compaction,
            region_compaction_threshold,
            used_before: heap.used(),
            start: Instant::now(),
        }
    }

    pub fn gc_id(&self) -> usize {
        self.gc_id
    }

    pub fn cause(&self) -> GCCause {
        self.cause
    }

    pub fn should_clear_soft_refs(&self) -> bool {
        self.clear_soft_refs
    }

    pub fn do_maximal_compaction(&self) -> bool {
        self.do_maximal_compaction
    }

    /// Regions with more live words than this are not compacted.
    pub fn region_compaction_threshold(&self) -> usize {
        self.region_compaction_threshold
    }

    pub fn used_before(&self) -> usize {
        self.used_before
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn log_pause(&self, heap: &Heap) -> Duration {
        let elapsed = self.elapsed();
        log::info!(
            target: "gc",
            "GC({}) Pause Full ({}) {}->{}({}) {}ms",
            self.gc_id,
            self.cause,
            formatted_size(self.used_before),
            formatted_size(heap.used()),
            formatted_size(heap.capacity()),
            elapsed.as_micros() as f64 / 1000.0
        );
        elapsed
    }
}
