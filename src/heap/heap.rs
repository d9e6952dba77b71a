use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use scoped_thread_pool::Pool;

use super::block_offset_table::BlockOffsetTable;
use super::card_table::CardTable;
use super::class_loader_data::ClassLoaderDataGraph;
use super::full_gc::{self, FullGCStats, GCCause};
use super::mark_bitmap::MarkBitmap;
use super::object::{
    ClassId, Descriptor, MarkWord, ObjectKind, Oop, ReferenceType, HEADER_WORDS, MIN_OBJECT_WORDS,
    NO_CLASS, WORD_SIZE,
};
use super::region::{HeapArguments, HeapOptions, HeapRegion};
use super::remset::RememberedSet;
use super::root_processor::{Root, RootHandles, WeakRootHandles};
use super::worker_policy::WorkerPolicy;
use super::{HeapRegionClaimer, HeapRegionClosure};
use crate::formatted_size;

/// Returned when an allocation cannot be satisfied even after a maximal
/// full collection.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AllocationFailure {
    pub word_size: usize,
    /// Whether full collections ran before giving up.
    pub after_full_gc: bool,
}

impl fmt::Display for AllocationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "out of memory: cannot allocate {}",
            formatted_size(self.word_size * WORD_SIZE)
        )?;
        if self.after_full_gc {
            write!(f, " after a maximal full collection")?;
        }
        Ok(())
    }
}

impl std::error::Error for AllocationFailure {}

/// Number of TLAB refills per mutator between collections the TLAB size aims for.
const TLAB_TARGET_REFILLS: usize = 50;

/// A fixed size heap split into equally sized regions.
///
/// Mutators allocate through [`Heap::allocate`] and must keep every object
/// they want to survive a collection reachable from a root: the
/// [`Heap::handles`] table, a registered [`Root`], a class loader handle or
/// another reachable object. Plain [`Oop`] values held in Rust locals are
/// not roots and become stale when a collection moves their object.
pub struct Heap {
    memory: Box<[AtomicUsize]>,
    options: HeapOptions,
    regions: Box<[HeapRegion]>,
    mark_bitmap: MarkBitmap,
    bot: BlockOffsetTable,
    card_table: CardTable,
    remsets: Box<[RememberedSet]>,
    roots: RwLock<Vec<Arc<dyn Root>>>,
    weak_roots: RwLock<Vec<Arc<WeakRootHandles>>>,
    handles: Arc<RootHandles>,
    weak_handles: Arc<WeakRootHandles>,
    pending_list: RootHandles,
    class_loader_data: ClassLoaderDataGraph,
    workers: Pool,
    max_workers: usize,
    active_workers: AtomicUsize,
    mutator_threads: AtomicUsize,
    alloc_region: Mutex<Option<usize>>,
    gc_lock: Mutex<()>,
    total_full_collections: AtomicUsize,
    desired_tlab_size: AtomicUsize,
}

impl Heap {
    pub fn new(args: HeapArguments) -> Self {
        let mut options = HeapRegion::setup_sizes(&args);
        let max_workers = WorkerPolicy::parallel_worker_threads(options.parallel_gc_threads);
        options.parallel_gc_threads = max_workers;

        let heap_words = options.region_count * options.region_size_words;
        let memory: Box<[AtomicUsize]> = (0..heap_words).map(|_| AtomicUsize::new(0)).collect();
        let base = memory.as_ptr() as usize;

        let regions = (0..options.region_count)
            .map(|i| HeapRegion::new(i, base + i * options.region_size_bytes, options.region_size_words))
            .collect();

        let handles = Arc::new(RootHandles::new("Handles", "HND"));
        let weak_handles = Arc::new(WeakRootHandles::new("Weak Handles", "WHND"));

        log::info!(target: "gc", "Heap: {}", options);
        log::info!(target: "gc", "Using {} parallel GC workers", max_workers);

        Self {
            mark_bitmap: MarkBitmap::new(base, heap_words),
            bot: BlockOffsetTable::new(base, heap_words),
            card_table: CardTable::new(base, heap_words),
            remsets: (0..options.region_count).map(|_| RememberedSet::new()).collect(),
            roots: RwLock::new(vec![handles.clone() as Arc<dyn Root>]),
            weak_roots: RwLock::new(vec![weak_handles.clone()]),
            handles,
            weak_handles,
            pending_list: RootHandles::new("Reference Pending List", "RPL"),
            class_loader_data: ClassLoaderDataGraph::new(),
            workers: Pool::new(max_workers),
            max_workers,
            active_workers: AtomicUsize::new(if options.use_dynamic_number_of_gc_threads {
                1
            } else {
                max_workers
            }),
            mutator_threads: AtomicUsize::new(1),
            alloc_region: Mutex::new(None),
            gc_lock: Mutex::new(()),
            total_full_collections: AtomicUsize::new(0),
            desired_tlab_size: AtomicUsize::new(options.min_tlab_size),
            memory,
            options,
            regions,
        }
    }

    pub fn options(&self) -> &HeapOptions {
        &self.options
    }

    pub fn base(&self) -> usize {
        self.memory.as_ptr() as usize
    }

    pub fn end(&self) -> usize {
        self.base() + self.memory.len() * WORD_SIZE
    }

    pub fn is_in(&self, addr: usize) -> bool {
        addr >= self.base() && addr < self.end()
    }

    pub fn num_regions(&self) -> usize {
        self.regions.len()
    }

    pub fn regions(&self) -> &[HeapRegion] {
        &self.regions
    }

    pub fn region(&self, index: usize) -> &HeapRegion {
        &self.regions[index]
    }

    pub fn region_index_for(&self, addr: usize) -> usize {
        debug_assert!(self.is_in(addr), "address {:#x} outside the heap", addr);
        (addr - self.base()) >> self.options.region_size_bytes_shift
    }

    pub fn region_for(&self, addr: usize) -> &HeapRegion {
        self.region(self.region_index_for(addr))
    }

    pub fn mark_bitmap(&self) -> &MarkBitmap {
        &self.mark_bitmap
    }

    pub fn block_offset_table(&self) -> &BlockOffsetTable {
        &self.bot
    }

    pub fn card_table(&self) -> &CardTable {
        &self.card_table
    }

    pub fn remset(&self, region: usize) -> &RememberedSet {
        &self.remsets[region]
    }

    pub fn workers(&self) -> &Pool {
        &self.workers
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::Relaxed)
    }

    /// Clamps `n` to the pool size and returns what was installed.
    pub fn set_active_workers(&self, n: usize) -> usize {
        let n = n.clamp(1, self.max_workers);
        self.active_workers.store(n, Ordering::Relaxed);
        n
    }

    pub fn mutator_threads(&self) -> usize {
        self.mutator_threads.load(Ordering::Relaxed)
    }

    pub fn set_mutator_threads(&self, n: usize) {
        self.mutator_threads.store(n.max(1), Ordering::Relaxed);
    }

    pub fn total_full_collections(&self) -> usize {
        self.total_full_collections.load(Ordering::Relaxed)
    }

    pub(crate) fn increment_total_full_collections(&self) -> usize {
        self.total_full_collections.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn gc_lock(&self) -> &Mutex<()> {
        &self.gc_lock
    }

    /// The default strong handle table.
    pub fn handles(&self) -> &RootHandles {
        &self.handles
    }

    /// The default weak handle table. Entries whose object dies are nulled.
    pub fn weak_handles(&self) -> &WeakRootHandles {
        &self.weak_handles
    }

    pub fn add_root(&self, root: Arc<dyn Root>) {
        self.roots.write().push(root);
    }

    pub fn add_weak_root(&self, root: Arc<WeakRootHandles>) {
        self.weak_roots.write().push(root);
    }

    pub fn roots(&self) -> Vec<Arc<dyn Root>> {
        self.roots.read().clone()
    }

    pub fn weak_roots(&self) -> Vec<Arc<WeakRootHandles>> {
        self.weak_roots.read().clone()
    }

    /// Reference objects whose referent was cleared by a collection.
    pub fn reference_pending_list(&self) -> &RootHandles {
        &self.pending_list
    }

    pub fn class_loader_data_graph(&self) -> &ClassLoaderDataGraph {
        &self.class_loader_data
    }

    pub fn register_class(&self, name: &str, permanent: bool) -> ClassId {
        self.class_loader_data.register(name, permanent)
    }

    pub fn desired_tlab_size(&self) -> usize {
        self.desired_tlab_size.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.options.region_count * self.options.region_size_bytes
    }

    pub fn used(&self) -> usize {
        self.regions.iter().filter(|r| !r.is_free()).map(|r| r.used()).sum()
    }

    pub fn num_free_regions(&self) -> usize {
        self.regions.iter().filter(|r| r.is_free()).count()
    }

    pub fn num_used_regions(&self) -> usize {
        self.num_regions() - self.num_free_regions()
    }

    pub fn heap_region_iterate(&self, closure: &mut dyn HeapRegionClosure) {
        for region in self.regions.iter() {
            if closure.do_heap_region(region) {
                break;
            }
        }
    }

    /// Visits the regions `claimer` hands to `worker_id`, starting at the
    /// worker's offset and wrapping around.
    pub fn heap_region_par_iterate_from_worker_offset(
        &self,
        closure: &mut dyn HeapRegionClosure,
        claimer: &HeapRegionClaimer,
        worker_id: usize,
    ) {
        let n = self.num_regions();
        let start = claimer.offset_for_worker(worker_id);
        for count in 0..n {
            let index = (start + count) % n;
            if !claimer.claim_region(index) {
                continue;
            }
            if closure.do_heap_region(self.region(index)) {
                return;
            }
        }
    }

    pub fn allocate(&self, descriptor: Descriptor) -> Result<Oop, AllocationFailure> {
        assert!(
            self.class_loader_data.is_alive(descriptor.class_id()),
            "allocating an instance of unloaded class {}",
            descriptor.class_id()
        );
        let words = descriptor.size();
        let addr = match self.attempt_allocation(words) {
            Some(addr) => addr,
            None => self.satisfy_failed_allocation(words)?,
        };
        Ok(unsafe { Oop::initialize(addr, descriptor) })
    }

    /// Allocates without ever triggering a collection.
    pub fn try_allocate(&self, descriptor: Descriptor) -> Option<Oop> {
        let addr = self.attempt_allocation(descriptor.size())?;
        Some(unsafe { Oop::initialize(addr, descriptor) })
    }

    pub fn allocate_instance(
        &self,
        class: ClassId,
        num_refs: usize,
        data_words: usize,
    ) -> Result<Oop, AllocationFailure> {
        let size = (HEADER_WORDS + num_refs + data_words).max(MIN_OBJECT_WORDS);
        self.allocate(Descriptor::new(ObjectKind::Instance, class, num_refs, size))
    }

    pub fn allocate_obj_array(&self, class: ClassId, length: usize) -> Result<Oop, AllocationFailure> {
        self.allocate(Descriptor::new(ObjectKind::ObjArray, class, 0, HEADER_WORDS + length))
    }

    pub fn allocate_type_array(&self, class: ClassId, words: usize) -> Result<Oop, AllocationFailure> {
        self.allocate(Descriptor::new(ObjectKind::TypeArray, class, 0, HEADER_WORDS + words))
    }

    /// Allocates a reference object: the referent followed by `extra_refs`
    /// ordinary reference fields.
    pub fn allocate_reference(
        &self,
        rt: ReferenceType,
        referent: Oop,
        extra_refs: usize,
    ) -> Result<Oop, AllocationFailure> {
        let refs = 1 + extra_refs;
        let obj = self.allocate(Descriptor::new(ObjectKind::Reference(rt), NO_CLASS, refs, HEADER_WORDS + refs))?;
        obj.referent_slot().store(referent);
        Ok(obj)
    }

    /// Stores `value` into reference field `index` of `obj` and records the
    /// cross-region pointer for the remembered sets.
    pub fn store_field(&self, obj: Oop, index: usize, value: Oop) {
        let slot = obj.field(index);
        slot.store(value);
        if value.is_null() {
            return;
        }
        let from = self.region_index_for(slot.address());
        let to = self.region_index_for(value.address());
        if from != to {
            self.card_table.mark_card(slot.address());
            self.remsets[to].add_card(self.card_table.card_index(slot.address()));
        }
    }

    /// Allocates an object whose region is pinned until [`Heap::unpin_object`].
    pub fn allocate_pinned(&self, descriptor: Descriptor) -> Result<Oop, AllocationFailure> {
        let obj = self.allocate(descriptor)?;
        self.pin_object(obj);
        Ok(obj)
    }

    pub fn pin_region(&self, index: usize) {
        self.region(index).pin();
    }

    pub fn unpin_region(&self, index: usize) {
        self.region(index).unpin();
    }

    pub fn pin_object(&self, obj: Oop) {
        self.pinnable_region(obj).pin();
    }

    pub fn unpin_object(&self, obj: Oop) {
        self.pinnable_region(obj).unpin();
    }

    fn pinnable_region(&self, obj: Oop) -> &HeapRegion {
        let region = self.region_for(obj.address());
        if region.is_humongous() {
            self.region(region.humongous_start_region())
        } else {
            region
        }
    }

    /// Returns the identity hash of `obj`, installing one on first use.
    pub fn identity_hash(&self, obj: Oop) -> usize {
        let mark = obj.mark();
        assert!(!mark.is_forwarded(), "identity hash of forwarded {:?}", obj);
        if !mark.has_no_hash() {
            return mark.hash();
        }
        let mut rng = rand::thread_rng();
        let hash = loop {
            let hash = rng.gen::<u32>() as usize & MarkWord::HASH_MASK;
            if hash != 0 {
                break hash;
            }
        };
        obj.set_mark(mark.copy_set_hash(hash));
        hash
    }

    /// Takes the highest free region for pre-populated objects that never move.
    pub fn allocate_archive_region(&self, closed: bool) -> Option<usize> {
        let _alloc_region = self.alloc_region.lock();
        let region = self.regions.iter().rev().find(|r| r.is_free())?;
        region.set_archive(closed);
        Some(region.index())
    }

    pub fn allocate_in_archive(&self, index: usize, descriptor: Descriptor) -> Option<Oop> {
        let _alloc_region = self.alloc_region.lock();
        let region = self.region(index);
        assert!(region.is_archive(), "{:?} is not an archive region", region);
        let addr = self.bump_allocate(region, descriptor.size())?;
        Some(unsafe { Oop::initialize(addr, descriptor) })
    }

    fn bump_allocate(&self, region: &HeapRegion, words: usize) -> Option<usize> {
        let top = region.top();
        let bytes = words * WORD_SIZE;
        if region.end() - top < bytes {
            return None;
        }
        region.set_top(top + bytes);
        self.bot.update_for_block(top, top + bytes);
        Some(top)
    }

    fn attempt_allocation(&self, words: usize) -> Option<usize> {
        if self.options.is_humongous(words) {
            return self.humongous_obj_allocate(words);
        }

        let mut alloc_region = self.alloc_region.lock();
        if let Some(index) = *alloc_region {
            if let Some(addr) = self.bump_allocate(self.region(index), words) {
                return Some(addr);
            }
        }

        let region = self.regions.iter().find(|r| r.is_free())?;
        region.set_eden();
        *alloc_region = Some(region.index());
        self.bump_allocate(region, words)
    }

    fn humongous_obj_allocate(&self, words: usize) -> Option<usize> {
        let num = self.options.required_regions(words);
        let _alloc_region = self.alloc_region.lock();

        let mut run = 0;
        for region in self.regions.iter() {
            run = if region.is_free() { run + 1 } else { 0 };
            if run == num {
                let first = region.index() + 1 - num;
                self.set_humongous_metadata(first, num, words);
                log::debug!(target: "gc", "Humongous allocation of {} words in regions [{}, {}]", words, first, region.index());
                return Some(self.region(first).bottom());
            }
        }
        None
    }

    /// Turns regions `[first, first + num)` into the home of a single
    /// humongous object of `word_size` words starting at the bottom of `first`.
    pub fn set_humongous_metadata(&self, first: usize, num: usize, word_size: usize) {
        debug_assert_eq!(num, self.options.required_regions(word_size));
        let start = self.region(first).bottom();
        let obj_end = start + word_size * WORD_SIZE;
        let last = first + num - 1;

        let last_region = self.region(last);
        let fill_words = (last_region.end() - obj_end) / WORD_SIZE;
        let last_top = if fill_words >= MIN_OBJECT_WORDS {
            unsafe {
                Oop::fill(obj_end, fill_words);
            }
            self.bot.update_for_block(obj_end, last_region.end());
            last_region.end()
        } else {
            obj_end
        };

        for index in first..=last {
            let region = self.region(index);
            let top = if index == last { last_top } else { region.end() };
            if index == first {
                region.set_starts_humongous(top);
            } else {
                region.set_continues_humongous(first, top);
            }
        }
        self.bot.update_for_block(start, obj_end);
    }

    /// Returns a region to the free state and drops its side data.
    pub fn free_region(&self, index: usize) {
        let region = self.region(index);
        self.bot.clear_range(region.bottom(), region.end());
        self.card_table.clear_range(region.bottom(), region.end());
        self.remsets[index].clear();
        region.set_free();
    }

    /// Frees every region of the humongous object starting in `start`.
    pub fn free_humongous_region(&self, start: usize) -> usize {
        let region = self.region(start);
        assert!(region.is_starts_humongous(), "{:?} does not start a humongous object", region);
        let num = self.options.required_regions(Oop::from_address(region.bottom()).size());
        for index in start..start + num {
            self.free_region(index);
        }
        num
    }

    /// Stops bump allocation into the current mutator region.
    pub fn retire_alloc_region(&self) {
        *self.alloc_region.lock() = None;
    }

    /// Puts regions left without objects back on the free list and
    /// recomputes the TLAB size for the space that is left.
    pub fn prepare_for_mutator_after_full_collection(&self) {
        for region in self.regions.iter() {
            if region.is_free() {
                continue;
            }
            if !region.is_humongous() && !region.is_archive() && region.is_empty() {
                self.free_region(region.index());
            } else if region.is_young() {
                region.set_old();
            }
        }
        self.resize_tlabs();
    }

    fn resize_tlabs(&self) {
        let free = self.capacity() - self.used();
        let per_refill = free / (self.mutator_threads() * TLAB_TARGET_REFILLS);
        let desired = super::align_down(per_refill, WORD_SIZE)
            .clamp(self.options.min_tlab_size, self.options.max_tlab_size);
        self.desired_tlab_size.store(desired, Ordering::Relaxed);
        log::debug!(target: "gc", "TLAB new size: {}", formatted_size(desired));
    }

    /// Runs a full collection. Concurrent callers serialize.
    pub fn do_full_collection(&self, clear_all_soft_refs: bool, do_maximal_compaction: bool) -> FullGCStats {
        self.do_full_collection_with_cause(GCCause::Explicit, clear_all_soft_refs, do_maximal_compaction)
    }

    pub fn do_full_collection_with_cause(
        &self,
        cause: GCCause,
        clear_all_soft_refs: bool,
        do_maximal_compaction: bool,
    ) -> FullGCStats {
        full_gc::collect(self, cause, clear_all_soft_refs, do_maximal_compaction)
    }

    pub fn collect(&self) -> FullGCStats {
        self.do_full_collection(false, false)
    }

    /// Escalates from a plain full collection to a maximal one that clears
    /// soft references, retrying the allocation after each step.
    pub fn satisfy_failed_allocation(&self, words: usize) -> Result<usize, AllocationFailure> {
        if let Some(addr) = self.satisfy_failed_allocation_helper(words, true, false) {
            return Ok(addr);
        }
        if let Some(addr) = self.satisfy_failed_allocation_helper(words, true, true) {
            return Ok(addr);
        }
        if let Some(addr) = self.satisfy_failed_allocation_helper(words, false, true) {
            return Ok(addr);
        }
        log::warn!(target: "gc", "Allocation of {} words failed after maximal compaction", words);
        Err(AllocationFailure {
            word_size: words,
            after_full_gc: true,
        })
    }

    fn satisfy_failed_allocation_helper(&self, words: usize, do_gc: bool, maximal_compaction: bool) -> Option<usize> {
        if let Some(addr) = self.attempt_allocation(words) {
            return Some(addr);
        }
        if do_gc {
            if maximal_compaction {
                log::info!(target: "gc", "Attempting maximal full compaction clearing soft references");
            } else {
                log::info!(target: "gc", "Attempting full compaction");
            }
            self.do_full_collection_with_cause(GCCause::AllocationFailure, maximal_compaction, maximal_compaction);
        }
        None
    }

    pub fn print_heap_summary(&self) {
        log::info!(target: "gc", "{}", self);
        for region in self.regions.iter() {
            log::trace!(target: "gc", "  {:?}", region);
        }
    }
}

impl fmt::Display for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "garbage-first heap total {}, used {} [{:#x}, {:#x}) region size {}, {} free regions",
            formatted_size(self.capacity()),
            formatted_size(self.used()),
            self.base(),
            self.end(),
            formatted_size(self.options.region_size_bytes),
            self.num_free_regions()
        )
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        self.workers.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_heap(regions: usize) -> Heap {
        Heap::new(HeapArguments {
            max_heap_size: regions * 4096,
            region_size: Some(4096),
            parallel_gc_threads: 2,
            ..Default::default()
        })
    }

    #[test]
    fn allocation_fills_regions_in_order() {
        let heap = small_heap(4);
        let words_per_region = heap.options().region_size_words;
        let a = heap.allocate_instance(NO_CLASS, 1, 10).unwrap();
        let b = heap.allocate_instance(NO_CLASS, 0, 10).unwrap();
        assert_eq!(heap.region_index_for(a.address()), 0);
        assert_eq!(b.address(), a.end());
        assert!(heap.region(0).is_young());

        // Fill the rest of region 0 with objects just under the humongous threshold.
        let big = heap.options().humongous_threshold_words - HEADER_WORDS;
        let c = heap.allocate_type_array(NO_CLASS, big).unwrap();
        let d = heap.allocate_type_array(NO_CLASS, big).unwrap();
        assert_eq!(heap.region_index_for(c.address()), 0);
        assert_eq!(heap.region_index_for(d.address()), 1);
        assert!(heap.used() > words_per_region * WORD_SIZE);
    }

    #[test]
    fn humongous_allocation_spans_regions() {
        let heap = small_heap(6);
        let words = heap.options().region_size_words + 10;
        let obj = heap.allocate_type_array(NO_CLASS, words - HEADER_WORDS).unwrap();
        let first = heap.region_index_for(obj.address());
        assert!(heap.region(first).is_starts_humongous());
        assert!(heap.region(first + 1).is_continues_humongous());
        assert_eq!(heap.region(first + 1).humongous_start_region(), first);
        // The tail of the last region is a filler and the region is full.
        assert_eq!(heap.region(first + 1).top(), heap.region(first + 1).end());
        assert!(Oop::from_address(obj.end()).is_filler());

        assert_eq!(heap.free_humongous_region(first), 2);
        assert!(heap.region(first).is_free() && heap.region(first + 1).is_free());
    }

    #[test]
    fn cross_region_stores_dirty_cards() {
        let heap = small_heap(4);
        let archive = heap.allocate_archive_region(false).unwrap();
        let target = heap
            .allocate_in_archive(archive, Descriptor::new(ObjectKind::Instance, NO_CLASS, 0, 4))
            .unwrap();
        let holder = heap.allocate_instance(NO_CLASS, 2, 0).unwrap();
        heap.store_field(holder, 0, target);
        assert!(heap.card_table().is_dirty(holder.field(0).address()));
        assert_eq!(heap.remset(archive).occupied(), 1);
    }

    #[test]
    fn identity_hash_is_stable() {
        let heap = small_heap(4);
        let obj = heap.allocate_instance(NO_CLASS, 0, 2).unwrap();
        let hash = heap.identity_hash(obj);
        assert_ne!(hash, 0);
        assert_eq!(heap.identity_hash(obj), hash);
        assert!(obj.mark().must_be_preserved());
    }

    #[test]
    fn allocation_failure_reports_size() {
        let heap = small_heap(4);
        let words = 8 * heap.options().region_size_words;
        let err = heap.allocate_type_array(NO_CLASS, words).unwrap_err();
        assert_eq!(err.word_size, words + HEADER_WORDS);
        assert!(err.after_full_gc);
        assert!(err.to_string().contains("after a maximal full collection"));
        assert_eq!(heap.total_full_collections(), 2);
    }
}
