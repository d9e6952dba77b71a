use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use atomic::Atomic;

use super::block_offset_table::BlockOffsetTable;
use super::full_gc::forwarding::ForwardingMode;
use super::mark_bitmap::MarkBitmap;
use super::object::{Oop, MIN_OBJECT_WORDS, WORD_SIZE};
use super::{align_down, is_power_of_2};
use crate::env::{read_bool_from_env, read_string_from_env, read_uint_from_env};
use crate::formatted_size;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum RegionType {
    Free,
    Eden,
    Survivor,
    Old,
    StartsHumongous,
    ContinuesHumongous,
    OpenArchive,
    ClosedArchive,
}

impl RegionType {
    pub fn short_name(self) -> &'static str {
        match self {
            RegionType::Free => "F",
            RegionType::Eden => "E",
            RegionType::Survivor => "S",
            RegionType::Old => "O",
            RegionType::StartsHumongous => "HS",
            RegionType::ContinuesHumongous => "HC",
            RegionType::OpenArchive => "OA",
            RegionType::ClosedArchive => "CA",
        }
    }
}

/// Which of the optional verification passes run around a full collection.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct VerifyOptions {
    pub before_gc: bool,
    pub after_marking: bool,
    pub after_gc: bool,
}

impl VerifyOptions {
    pub const ALL: VerifyOptions = VerifyOptions {
        before_gc: true,
        after_marking: true,
        after_gc: true,
    };

    pub fn from_bits(bits: usize) -> Self {
        Self {
            before_gc: bits & 1 != 0,
            after_marking: bits & 2 != 0,
            after_gc: bits & 4 != 0,
        }
    }
}

/// User facing heap configuration. `Default` picks up `FULLGC_*` environment
/// variables and falls back to built-in values.
#[derive(Clone, Debug)]
pub struct HeapArguments {
    pub max_heap_size: usize,
    /// Explicit region size in bytes. Derived from `target_num_regions` when unset.
    pub region_size: Option<usize>,
    pub target_num_regions: usize,
    pub min_tlab_size: usize,
    /// Size of the worker pool, 0 selects it from the number of CPUs.
    pub parallel_gc_threads: usize,
    pub use_dynamic_number_of_gc_threads: bool,
    /// Percentage of dead space tolerated in a region before it is compacted.
    pub mark_sweep_dead_ratio: usize,
    pub heap_waste_percent: usize,
    pub heap_size_per_gc_thread: usize,
    pub obj_array_marking_stride: usize,
    /// Local mark queue length beyond which tasks go to the shared overflow queue.
    pub mark_queue_capacity: usize,
    pub forwarding: ForwardingMode,
    pub verify: VerifyOptions,
}

impl Default for HeapArguments {
    fn default() -> Self {
        let forwarding = match read_string_from_env("FULLGC_FORWARDING").as_deref() {
            Some("in-header") => ForwardingMode::InHeader,
            Some("side-table") | None => ForwardingMode::SideTable,
            Some(other) => {
                log::warn!(target: "gc", "Unknown FULLGC_FORWARDING value '{}', using side-table", other);
                ForwardingMode::SideTable
            }
        };

        Self {
            max_heap_size: read_uint_from_env("FULLGC_HEAP_SIZE").unwrap_or(64 * 1024 * 1024),
            region_size: read_uint_from_env("FULLGC_REGION_SIZE"),
            target_num_regions: 2048,
            min_tlab_size: 2 * 1024,
            parallel_gc_threads: read_uint_from_env("FULLGC_PARALLEL_GC_THREADS").unwrap_or(0),
            use_dynamic_number_of_gc_threads: read_bool_from_env("FULLGC_DYNAMIC_WORKERS")
                .unwrap_or(true),
            mark_sweep_dead_ratio: read_uint_from_env("FULLGC_MARK_SWEEP_DEAD_RATIO").unwrap_or(5),
            heap_waste_percent: read_uint_from_env("FULLGC_HEAP_WASTE_PERCENT").unwrap_or(5),
            heap_size_per_gc_thread: read_uint_from_env("FULLGC_HEAP_SIZE_PER_GC_THREAD")
                .unwrap_or_else(|| scale_for_word_size(32 * 1024 * 1024)),
            obj_array_marking_stride: read_uint_from_env("FULLGC_OBJ_ARRAY_MARKING_STRIDE")
                .unwrap_or(2048),
            mark_queue_capacity: 1 << 13,
            forwarding,
            verify: read_uint_from_env("FULLGC_VERIFY")
                .map(VerifyOptions::from_bits)
                .unwrap_or_default(),
        }
    }
}

/// Grows a 32-bit tuned byte count for 64-bit heaps, where objects are larger.
pub const fn scale_for_word_size(bytes: usize) -> usize {
    if WORD_SIZE == 8 {
        bytes * 13 / 10 / WORD_SIZE * WORD_SIZE
    } else {
        bytes
    }
}

/// Sizes derived from [`HeapArguments`] by [`HeapRegion::setup_sizes`].
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct HeapOptions {
    pub region_size_bytes: usize,
    pub region_size_words: usize,
    pub region_size_bytes_shift: usize,
    pub region_count: usize,
    pub humongous_threshold_words: usize,
    pub max_heap_size: usize,
    pub max_tlab_size: usize,
    pub min_tlab_size: usize,
    pub parallel_gc_threads: usize,
    pub use_dynamic_number_of_gc_threads: bool,
    pub mark_sweep_dead_ratio: usize,
    pub heap_waste_percent: usize,
    pub heap_size_per_gc_thread: usize,
    pub obj_array_marking_stride: usize,
    pub mark_queue_capacity: usize,
    pub forwarding: ForwardingMode,
    pub verify: VerifyOptions,
}

impl HeapOptions {
    pub const fn required_regions(&self, word_size: usize) -> usize {
        (word_size + self.region_size_words - 1) / self.region_size_words
    }

    pub const fn is_humongous(&self, word_size: usize) -> bool {
        word_size > self.humongous_threshold_words
    }
}

impl fmt::Display for HeapOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapOptions")
            .field("region_size", &formatted_size(self.region_size_bytes))
            .field("region_count", &self.region_count)
            .field("humongous_threshold_words", &self.humongous_threshold_words)
            .field("max_heap_size", &formatted_size(self.max_heap_size))
            .field("parallel_gc_threads", &self.parallel_gc_threads)
            .field("forwarding", &self.forwarding)
            .finish()
    }
}

/// Fixed size slice of the heap. Regions are created once and recycled.
pub struct HeapRegion {
    index: usize,
    bottom: usize,
    end: usize,
    top: AtomicUsize,
    typ: Atomic<RegionType>,
    humongous_start: AtomicUsize,
    pinned: AtomicUsize,
}

impl HeapRegion {
    pub const MIN_REGION_SIZE: usize = 1024;
    pub const MIN_DEFAULT_REGION_SIZE: usize = 64 * 1024;
    pub const MAX_REGION_SIZE: usize = 32 * 1024 * 1024;
    pub const MIN_NUM_REGIONS: usize = 2;

    pub fn setup_sizes(args: &HeapArguments) -> HeapOptions {
        let mut region_size = match args.region_size {
            Some(size) => size.max(Self::MIN_REGION_SIZE),
            None => (args.max_heap_size / args.target_num_regions.max(1))
                .clamp(Self::MIN_DEFAULT_REGION_SIZE, Self::MAX_REGION_SIZE),
        };

        if !is_power_of_2(region_size) {
            region_size = region_size.next_power_of_two();
        }
        region_size = region_size.min(Self::MAX_REGION_SIZE);

        if region_size > args.max_heap_size / Self::MIN_NUM_REGIONS {
            panic!(
                "Max heap size ({}) is too low to afford the minimum number of regions ({}) of region size ({})",
                formatted_size(args.max_heap_size),
                Self::MIN_NUM_REGIONS,
                formatted_size(region_size)
            );
        }

        let max_heap_size = align_down(args.max_heap_size, region_size);
        let region_size_words = region_size / WORD_SIZE;

        let mut opts = HeapOptions {
            region_size_bytes: region_size,
            region_size_words,
            region_size_bytes_shift: region_size.trailing_zeros() as usize,
            region_count: max_heap_size / region_size,
            humongous_threshold_words: region_size_words / 2,
            max_heap_size,
            min_tlab_size: args.min_tlab_size,
            max_tlab_size: 0,
            parallel_gc_threads: args.parallel_gc_threads,
            use_dynamic_number_of_gc_threads: args.use_dynamic_number_of_gc_threads,
            mark_sweep_dead_ratio: args.mark_sweep_dead_ratio.min(100),
            heap_waste_percent: args.heap_waste_percent.min(100),
            heap_size_per_gc_thread: args.heap_size_per_gc_thread.max(1),
            obj_array_marking_stride: args.obj_array_marking_stride.max(1),
            mark_queue_capacity: args.mark_queue_capacity.max(16),
            forwarding: args.forwarding,
            verify: args.verify,
        };
        // Larger TLABs could retire a whole region prematurely.
        opts.max_tlab_size = (opts.region_size_bytes / 8).max(opts.min_tlab_size);

        log::info!(target: "gc", "Region sizes setup complete");
        log::info!(target: "gc", "- Max heap size: {}", formatted_size(opts.max_heap_size));
        log::info!(target: "gc", "- Region count: {}", opts.region_count);
        log::info!(target: "gc", "- Region size: {}", formatted_size(opts.region_size_bytes));
        log::info!(target: "gc", "- Humongous threshold: {}", formatted_size(opts.humongous_threshold_words * WORD_SIZE));
        log::info!(target: "gc", "- Max TLAB size: {}", formatted_size(opts.max_tlab_size));

        opts
    }

    pub fn new(index: usize, bottom: usize, words: usize) -> Self {
        Self {
            index,
            bottom,
            end: bottom + words * WORD_SIZE,
            top: AtomicUsize::new(bottom),
            typ: Atomic::new(RegionType::Free),
            humongous_start: AtomicUsize::new(usize::MAX),
            pinned: AtomicUsize::new(0),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn bottom(&self) -> usize {
        self.bottom
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn top(&self) -> usize {
        self.top.load(Ordering::Acquire)
    }

    pub fn set_top(&self, top: usize) {
        debug_assert!(top >= self.bottom && top <= self.end, "top {:#x} outside {:?}", top, self);
        self.top.store(top, Ordering::Release);
    }

    pub fn capacity(&self) -> usize {
        self.end - self.bottom
    }

    pub fn used(&self) -> usize {
        self.top() - self.bottom
    }

    pub fn free(&self) -> usize {
        self.end - self.top()
    }

    pub fn is_empty(&self) -> bool {
        self.top() == self.bottom
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.bottom && addr < self.end
    }

    pub fn region_type(&self) -> RegionType {
        self.typ.load(Ordering::Acquire)
    }

    fn set_type(&self, typ: RegionType) {
        self.typ.store(typ, Ordering::Release);
    }

    pub fn is_free(&self) -> bool {
        self.region_type() == RegionType::Free
    }

    pub fn is_young(&self) -> bool {
        matches!(self.region_type(), RegionType::Eden | RegionType::Survivor)
    }

    pub fn is_old(&self) -> bool {
        self.region_type() == RegionType::Old
    }

    pub fn is_humongous(&self) -> bool {
        matches!(
            self.region_type(),
            RegionType::StartsHumongous | RegionType::ContinuesHumongous
        )
    }

    pub fn is_starts_humongous(&self) -> bool {
        self.region_type() == RegionType::StartsHumongous
    }

    pub fn is_continues_humongous(&self) -> bool {
        self.region_type() == RegionType::ContinuesHumongous
    }

    pub fn is_archive(&self) -> bool {
        matches!(
            self.region_type(),
            RegionType::OpenArchive | RegionType::ClosedArchive
        )
    }

    pub fn is_open_archive(&self) -> bool {
        self.region_type() == RegionType::OpenArchive
    }

    pub fn is_closed_archive(&self) -> bool {
        self.region_type() == RegionType::ClosedArchive
    }

    /// Objects in archive regions and regions with an active pin never move.
    pub fn has_pinned_objects(&self) -> bool {
        self.is_archive() || self.pinned.load(Ordering::Acquire) > 0
    }

    pub fn pin(&self) {
        self.pinned.fetch_add(1, Ordering::AcqRel);
    }

    pub fn unpin(&self) {
        let prev = self.pinned.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "unbalanced unpin of region {}", self.index);
    }

    /// Index of the starts-humongous region of the object this region belongs to.
    pub fn humongous_start_region(&self) -> usize {
        debug_assert!(self.is_humongous(), "{:?} is not humongous", self);
        self.humongous_start.load(Ordering::Acquire)
    }

    pub fn set_free(&self) {
        self.set_type(RegionType::Free);
        self.humongous_start.store(usize::MAX, Ordering::Release);
        self.pinned.store(0, Ordering::Release);
        self.set_top(self.bottom);
    }

    pub fn set_eden(&self) {
        self.set_type(RegionType::Eden);
    }

    pub fn set_old(&self) {
        self.set_type(RegionType::Old);
    }

    pub fn set_archive(&self, closed: bool) {
        self.set_type(if closed {
            RegionType::ClosedArchive
        } else {
            RegionType::OpenArchive
        });
    }

    pub fn set_starts_humongous(&self, top: usize) {
        self.set_type(RegionType::StartsHumongous);
        self.humongous_start.store(self.index, Ordering::Release);
        self.set_top(top);
    }

    pub fn set_continues_humongous(&self, start_index: usize, top: usize) {
        self.set_type(RegionType::ContinuesHumongous);
        self.humongous_start.store(start_index, Ordering::Release);
        self.set_top(top);
    }

    /// Walks the marked objects in `[bottom, top)`. The closure returns the
    /// size of the object it was given, the walk resumes after it.
    pub fn apply_to_marked_objects(&self, bitmap: &MarkBitmap, mut f: impl FnMut(Oop) -> usize) {
        let limit = self.top();
        let mut next = bitmap.get_next_marked_addr(self.bottom, limit);
        while next < limit {
            let size = f(Oop::from_address(next));
            debug_assert!(size >= MIN_OBJECT_WORDS);
            next = bitmap.get_next_marked_addr(next + size * WORD_SIZE, limit);
        }
    }

    /// Walks every object (live, dead or filler) in `[bottom, top)`.
    pub fn object_iterate(&self, mut f: impl FnMut(Oop)) {
        let limit = self.top();
        let mut cur = self.bottom;
        while cur < limit {
            let obj = Oop::from_address(cur);
            f(obj);
            cur = obj.end();
        }
    }

    /// Formats `[start, end)` as dead space.
    pub fn fill_range_with_dead_objects(&self, bot: &BlockOffsetTable, start: usize, end: usize) {
        debug_assert!(start >= self.bottom && end <= self.end && start < end);
        let words = (end - start) / WORD_SIZE;
        assert!(
            words >= MIN_OBJECT_WORDS,
            "dead range [{:#x}, {:#x}) is too small for a filler",
            start,
            end
        );
        unsafe {
            Oop::fill(start, words);
        }
        bot.update_for_block(start, end);
    }

    /// Installs the top computed by compaction for this region as a target.
    pub fn reset_compacted_after_full_gc(&self, new_top: usize) {
        assert!(!self.has_pinned_objects(), "pinned {:?} cannot be compacted", self);
        self.set_top(new_top);
        if self.is_young() || (self.is_free() && new_top > self.bottom) {
            self.set_old();
        }
    }

    pub fn reset_skip_compacting_after_full_gc(&self) {
        if self.is_young() {
            self.set_old();
        }
    }
}

impl fmt::Debug for HeapRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HeapRegion({} {} [{:#x}, {:#x}, {:#x}))",
            self.index,
            self.region_type().short_name(),
            self.bottom,
            self.top(),
            self.end
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(heap: usize, region: usize) -> HeapArguments {
        HeapArguments {
            max_heap_size: heap,
            region_size: Some(region),
            parallel_gc_threads: 1,
            ..Default::default()
        }
    }

    #[test]
    fn setup_sizes_rounds_to_powers_of_two() {
        let opts = HeapRegion::setup_sizes(&args(10 * 3000, 3000));
        assert_eq!(opts.region_size_bytes, 4096);
        assert_eq!(opts.region_count, 7);
        assert_eq!(opts.region_size_words, 4096 / WORD_SIZE);
        assert_eq!(opts.humongous_threshold_words, opts.region_size_words / 2);
        assert_eq!(opts.required_regions(opts.region_size_words + 1), 2);
    }

    #[test]
    #[should_panic]
    fn setup_sizes_rejects_tiny_heaps() {
        HeapRegion::setup_sizes(&args(4096, 4096));
    }

    #[test]
    fn region_type_transitions() {
        let r = HeapRegion::new(3, 0x10000, 128);
        assert!(r.is_free() && r.is_empty());
        r.set_starts_humongous(r.end());
        assert!(r.is_humongous() && r.is_starts_humongous());
        assert_eq!(r.humongous_start_region(), 3);
        r.set_free();
        assert!(r.is_free() && r.is_empty());
        r.set_archive(true);
        assert!(r.has_pinned_objects() && r.is_closed_archive());
        r.set_old();
        assert!(!r.has_pinned_objects());
        r.pin();
        assert!(r.has_pinned_objects());
        r.unpin();
        assert!(!r.has_pinned_objects());
    }
}
