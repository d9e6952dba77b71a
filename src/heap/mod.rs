use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use self::region::HeapRegion;

pub mod block_offset_table;
pub mod card_table;
pub mod class_loader_data;
pub mod full_gc;
#[allow(clippy::module_inception)]
pub mod heap;
pub mod mark_bitmap;
pub mod object;
pub mod region;
pub mod region_attr;
pub mod remset;
pub mod root_processor;
pub mod taskqueue;
pub mod verifier;
pub mod worker_policy;

#[inline(always)]
pub const fn align_down(addr: usize, align: usize) -> usize {
    addr & !align.wrapping_sub(1)
}
#[inline(always)]
pub const fn align_up(addr: usize, align: usize) -> usize {
    addr.wrapping_add(align).wrapping_sub(1) & !align.wrapping_sub(1)
}
#[inline(always)]
pub const fn is_aligned(addr: usize, align: usize) -> bool {
    addr & align.wrapping_sub(1) == 0
}
#[inline(always)]
pub const fn is_power_of_2(value: usize) -> bool {
    value != 0 && value & (value - 1) == 0
}

/// Visitor for heap regions. Returning `true` aborts the iteration.
pub trait HeapRegionClosure {
    fn do_heap_region(&mut self, region: &HeapRegion) -> bool;
}

impl<F: FnMut(&HeapRegion) -> bool> HeapRegionClosure for F {
    fn do_heap_region(&mut self, region: &HeapRegion) -> bool {
        self(region)
    }
}

/// Hands out every region to exactly one of several workers. Each worker
/// starts at a different offset to spread contention.
pub struct HeapRegionClaimer {
    n_workers: usize,
    claims: Box<[AtomicBool]>,
}

impl HeapRegionClaimer {
    pub fn new(n_workers: usize, num_regions: usize) -> Self {
        assert!(n_workers > 0, "need at least one worker");
        Self {
            n_workers,
            claims: (0..num_regions).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    pub fn n_regions(&self) -> usize {
        self.claims.len()
    }

    pub fn offset_for_worker(&self, worker_id: usize) -> usize {
        debug_assert!(worker_id < self.n_workers, "invalid worker id {}", worker_id);
        self.n_regions() * worker_id / self.n_workers
    }

    pub fn is_region_claimed(&self, index: usize) -> bool {
        self.claims[index].load(Ordering::Acquire)
    }

    pub fn claim_region(&self, index: usize) -> bool {
        !self.claims[index].swap(true, Ordering::AcqRel)
    }
}

pub type PhaseTimes = Mutex<Vec<(&'static str, Duration)>>;

/// Logs the duration of a collection phase when dropped and optionally
/// records it.
pub struct PhaseTimer<'a> {
    gc_id: usize,
    title: &'static str,
    start: Instant,
    sink: Option<&'a PhaseTimes>,
}

impl<'a> PhaseTimer<'a> {
    pub fn new(gc_id: usize, title: &'static str) -> Self {
        log::trace!(target: "gc-phases", "GC({}) {} started", gc_id, title);
        Self {
            gc_id,
            title,
            start: Instant::now(),
            sink: None,
        }
    }

    pub fn recorded(gc_id: usize, title: &'static str, sink: &'a PhaseTimes) -> Self {
        let mut timer = Self::new(gc_id, title);
        timer.sink = Some(sink);
        timer
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for PhaseTimer<'_> {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        log::debug!(target: "gc-phases", "GC({}) {} {}ms", self.gc_id, self.title, elapsed.as_micros() as f64 / 1000.0);
        if let Some(sink) = self.sink {
            sink.lock().push((self.title, elapsed));
        }
    }
}
