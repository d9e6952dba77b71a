use super::forwarding::ForwardingMode;
use super::*;
use crate::heap::object::{
    Descriptor, MarkWord, ObjectKind, Oop, ReferenceType, Slot, HEADER_WORDS, NO_CLASS, WORD_SIZE,
};
use crate::heap::region::{HeapArguments, VerifyOptions};

const REGION_SIZE: usize = 4096;

fn heap_with(regions: usize, workers: usize, configure: impl FnOnce(&mut HeapArguments)) -> Heap {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut args = HeapArguments {
        max_heap_size: regions * REGION_SIZE,
        region_size: Some(REGION_SIZE),
        parallel_gc_threads: workers,
        use_dynamic_number_of_gc_threads: false,
        mark_sweep_dead_ratio: 5,
        obj_array_marking_stride: 2048,
        forwarding: ForwardingMode::SideTable,
        verify: VerifyOptions::ALL,
        ..Default::default()
    };
    configure(&mut args);
    Heap::new(args)
}

fn test_heap(regions: usize, workers: usize) -> Heap {
    heap_with(regions, workers, |_| {})
}

fn keep(heap: &Heap, obj: Oop) -> usize {
    heap.handles().push(obj)
}

fn kept(heap: &Heap, handle: usize) -> Oop {
    heap.handles().get(handle)
}

/// Allocates unreachable arrays until region `index` is full.
fn fill_with_garbage(heap: &Heap, index: usize) {
    let threshold = heap.options().humongous_threshold_words;
    loop {
        let free = heap.region(index).free() / WORD_SIZE;
        if free == 0 {
            break;
        }
        let words = if free > threshold { threshold / 2 } else { free };
        let garbage = heap.allocate_type_array(NO_CLASS, words - HEADER_WORDS).unwrap();
        assert_eq!(heap.region_index_for(garbage.address()), index);
    }
}

fn heap_words(heap: &Heap) -> Vec<usize> {
    (heap.base()..heap.end())
        .step_by(WORD_SIZE)
        .map(|addr| Slot::from_address(addr).load().address())
        .collect()
}

/// A collector driven phase by phase.
fn manual_collector(heap: &Heap) -> FullCollector<'_> {
    let gc_id = heap.increment_total_full_collections();
    let scope = FullGCScope::new(heap, gc_id, GCCause::Explicit, false, false);
    let workers = FullCollector::calc_active_workers(heap);
    FullCollector::new(heap, scope, workers)
}

#[test]
fn live_objects_slide_to_region_bottom() {
    let heap = test_heap(4, 1);
    let mut handles = Vec::new();
    for i in 0..5 {
        let obj = heap.allocate_instance(NO_CLASS, 1, 7).unwrap();
        obj.set_raw_word(1, 100 + i);
        if i % 2 == 0 {
            handles.push(keep(&heap, obj));
        }
    }
    heap.store_field(kept(&heap, handles[0]), 0, kept(&heap, handles[1]));
    heap.store_field(kept(&heap, handles[1]), 0, kept(&heap, handles[2]));

    let stats = heap.collect();

    let bottom = heap.region(0).bottom();
    for (i, &handle) in handles.iter().enumerate() {
        let obj = kept(&heap, handle);
        assert_eq!(obj.address(), bottom + i * 10 * WORD_SIZE);
        assert_eq!(obj.raw_word(1), 100 + 2 * i);
    }
    assert_eq!(kept(&heap, handles[0]).load_field(0), kept(&heap, handles[1]));
    assert_eq!(kept(&heap, handles[1]).load_field(0), kept(&heap, handles[2]));
    assert!(kept(&heap, handles[2]).load_field(0).is_null());

    assert_eq!(heap.region(0).top(), bottom + 30 * WORD_SIZE);
    assert!(heap.region(0).is_old());
    assert!((1..4).all(|i| heap.region(i).is_free()));
    assert_eq!(stats.objects_marked, 3);
    assert_eq!(stats.objects_moved, 2);
    assert!(!stats.compaction_skipped);
    assert!(!stats.serial_compaction);
    assert!(stats.used_after < stats.used_before);
}

#[test]
fn maximal_compaction_moves_humongous_object_down() {
    let heap = test_heap(6, 1);
    let live = heap.allocate_instance(NO_CLASS, 0, 8).unwrap();
    let live_handle = keep(&heap, live);
    fill_with_garbage(&heap, 0);
    // Region 1 only holds garbage, it is the free run once marking is done.
    let garbage = heap.allocate_type_array(NO_CLASS, 100).unwrap();
    assert_eq!(heap.region_index_for(garbage.address()), 1);

    let words = heap.options().region_size_words + 10;
    let big = heap.allocate_type_array(NO_CLASS, words - HEADER_WORDS).unwrap();
    assert_eq!(heap.region_index_for(big.address()), 2);
    assert!(heap.region(3).is_continues_humongous());
    big.set_raw_word(0, 0xdead);
    big.set_raw_word(words - HEADER_WORDS - 1, 0xbeef);
    let big_handle = keep(&heap, big);

    let stats = heap.do_full_collection(false, true);

    let big = kept(&heap, big_handle);
    assert_eq!(big.address(), heap.region(1).bottom());
    assert_eq!(big.size(), words);
    assert_eq!(big.raw_word(0), 0xdead);
    assert_eq!(big.raw_word(words - HEADER_WORDS - 1), 0xbeef);
    assert!(heap.region(1).is_starts_humongous());
    assert!(heap.region(2).is_continues_humongous());
    assert_eq!(heap.region(2).humongous_start_region(), 1);
    assert!(heap.region(3).is_free());
    assert!(heap.region(4).is_free() && heap.region(5).is_free());

    assert_eq!(kept(&heap, live_handle).address(), heap.region(0).bottom());
    assert!(stats.serial_compaction);
    assert!(stats.humongous_compaction);
    assert_eq!(stats.humongous_moved, 1);
}

#[test]
fn humongous_objects_stay_without_maximal_compaction() {
    let heap = test_heap(6, 1);
    heap.allocate_type_array(NO_CLASS, 100).unwrap();
    let words = heap.options().region_size_words + 10;
    let big = heap.allocate_type_array(NO_CLASS, words - HEADER_WORDS).unwrap();
    let address = big.address();
    let handle = keep(&heap, big);

    let stats = heap.collect();

    assert_eq!(kept(&heap, handle).address(), address);
    assert!(!stats.humongous_compaction);
    assert!(heap.region(0).is_free());
}

#[test]
fn references_into_closed_archive_are_left_alone() {
    let heap = test_heap(4, 1);
    let archive = heap.allocate_archive_region(true).unwrap();
    let archived = heap
        .allocate_in_archive(archive, Descriptor::new(ObjectKind::Instance, NO_CLASS, 0, 4))
        .unwrap();
    let archive_top = heap.region(archive).top();

    heap.allocate_instance(NO_CLASS, 0, 8).unwrap();
    let holder = heap.allocate_instance(NO_CLASS, 2, 0).unwrap();
    heap.store_field(holder, 0, archived);
    let handle = keep(&heap, holder);

    let stats = heap.collect();

    let holder = kept(&heap, handle);
    assert_eq!(holder.address(), heap.region(0).bottom());
    assert_eq!(holder.field(0).load().address(), archived.address());
    assert!(heap.region(archive).is_closed_archive());
    assert_eq!(heap.region(archive).top(), archive_top);
    assert_eq!(stats.objects_moved, 1);
}

#[test]
fn dead_open_archive_regions_are_freed() {
    let heap = test_heap(4, 1);
    let descriptor = Descriptor::new(ObjectKind::Instance, NO_CLASS, 0, 4);
    let dead_archive = heap.allocate_archive_region(false).unwrap();
    heap.allocate_in_archive(dead_archive, descriptor).unwrap();
    let live_archive = heap.allocate_archive_region(false).unwrap();
    let obj = heap.allocate_in_archive(live_archive, descriptor).unwrap();
    let handle = keep(&heap, obj);

    let stats = heap.collect();

    assert!(heap.region(dead_archive).is_free());
    assert!(heap.region(live_archive).is_open_archive());
    assert_eq!(kept(&heap, handle), obj);
    assert!(stats.compaction_skipped);
}

fn serial_compaction_packs_compaction_point_tails(mode: ForwardingMode) {
    let heap = heap_with(8, 2, |args| args.forwarding = mode);
    let mut handles = Vec::new();
    for region in 0..4 {
        let obj = heap.allocate_instance(NO_CLASS, 1, 7).unwrap();
        assert_eq!(heap.region_index_for(obj.address()), region);
        obj.set_raw_word(1, region);
        handles.push(keep(&heap, obj));
        fill_with_garbage(&heap, region);
    }
    for i in 0..handles.len() {
        let next = kept(&heap, handles[(i + 1) % handles.len()]);
        heap.store_field(kept(&heap, handles[i]), 0, next);
    }

    let stats = heap.collect();

    // Every compaction point stopped in its first region, the serial pass
    // packs the rest behind the lowest one.
    assert_eq!(stats.workers, 2);
    assert!(stats.serial_compaction);
    assert_eq!(stats.objects_moved, 3);

    let bottom = heap.region(0).bottom();
    let mut addresses = handles.iter().map(|&h| kept(&heap, h).address()).collect::<Vec<_>>();
    addresses.sort_unstable();
    let expected = (0..4).map(|i| bottom + i * 10 * WORD_SIZE).collect::<Vec<_>>();
    assert_eq!(addresses, expected);
    assert_eq!(heap.region(0).top(), bottom + 40 * WORD_SIZE);
    assert_eq!(heap.num_free_regions(), 7);

    for (i, &handle) in handles.iter().enumerate() {
        let obj = kept(&heap, handle);
        assert_eq!(obj.raw_word(1), i);
        assert_eq!(obj.load_field(0), kept(&heap, handles[(i + 1) % handles.len()]));
        assert_eq!(obj.mark(), MarkWord::prototype());
    }
}

#[test]
fn serial_compaction_with_side_table() {
    serial_compaction_packs_compaction_point_tails(ForwardingMode::SideTable);
}

#[test]
fn serial_compaction_with_in_header_forwarding() {
    serial_compaction_packs_compaction_point_tails(ForwardingMode::InHeader);
}

/// Checks that no copy wrote over a source range a later copy still had
/// to read. Returns the number of copies.
fn assert_copies_never_overwrite_unread_sources(collector: &FullCollector<'_>) -> usize {
    let log = collector.copy_log.lock();
    for (i, (_, written)) in log.iter().enumerate() {
        for (read, _) in &log[i + 1..] {
            assert!(
                written.end <= read.start || read.end <= written.start,
                "copy into {:#x?} overwrote {:#x?} before it was read",
                written,
                read
            );
        }
    }
    log.len()
}

fn serial_tails_are_copied_without_clobbering(mode: ForwardingMode) {
    let heap = heap_with(8, 2, |args| args.forwarding = mode);
    let mut handles = Vec::new();
    for region in 0..4 {
        for i in 0..2 {
            let obj = heap.allocate_instance(NO_CLASS, 1, 7).unwrap();
            assert_eq!(heap.region_index_for(obj.address()), region);
            obj.set_raw_word(1, 2 * region + i);
            handles.push(keep(&heap, obj));
            if i == 0 {
                heap.allocate_instance(NO_CLASS, 0, 8).unwrap();
            }
        }
        fill_with_garbage(&heap, region);
    }

    let collector = manual_collector(&heap);
    assert_eq!(collector.workers(), 2);
    collector.prepare_collection();
    collector.phase1_mark_live_objects();
    collector.phase2_prepare_compaction();
    assert!(collector.stats.lock().serial_compaction);
    collector.phase3_adjust_pointers();
    collector.phase4_do_compaction();

    assert_eq!(assert_copies_never_overwrite_unread_sources(&collector), 7);

    collector.phase5_reset_metadata();
    let stats = collector.complete_collection();
    assert_eq!(stats.objects_moved, 7);

    let bottom = heap.region(0).bottom();
    let mut addresses = handles.iter().map(|&h| kept(&heap, h).address()).collect::<Vec<_>>();
    addresses.sort_unstable();
    let expected = (0..8).map(|i| bottom + i * 10 * WORD_SIZE).collect::<Vec<_>>();
    assert_eq!(addresses, expected);
    for (i, &handle) in handles.iter().enumerate() {
        assert_eq!(kept(&heap, handle).raw_word(1), i);
    }
}

#[test]
fn serial_tails_are_copied_without_clobbering_with_side_table() {
    serial_tails_are_copied_without_clobbering(ForwardingMode::SideTable);
}

#[test]
fn serial_tails_are_copied_without_clobbering_with_in_header_forwarding() {
    serial_tails_are_copied_without_clobbering(ForwardingMode::InHeader);
}

fn identity_hash_survives_move(mode: ForwardingMode) -> FullGCStats {
    let heap = heap_with(4, 1, |args| args.forwarding = mode);
    heap.allocate_instance(NO_CLASS, 0, 8).unwrap();
    let hashed = heap.allocate_instance(NO_CLASS, 0, 8).unwrap();
    let hash = heap.identity_hash(hashed);
    let plain = heap.allocate_instance(NO_CLASS, 0, 8).unwrap();
    let hashed_handle = keep(&heap, hashed);
    let plain_handle = keep(&heap, plain);

    let stats = heap.collect();

    let hashed = kept(&heap, hashed_handle);
    let plain = kept(&heap, plain_handle);
    assert_eq!(hashed.address(), heap.region(0).bottom());
    assert_eq!(plain.address(), hashed.end());
    assert!(!hashed.mark().is_forwarded());
    assert_eq!(heap.identity_hash(hashed), hash);
    assert_eq!(plain.mark(), MarkWord::prototype());
    assert_eq!(stats.objects_moved, 2);
    stats
}

#[test]
fn side_table_forwarding_keeps_hashes_in_place() {
    let stats = identity_hash_survives_move(ForwardingMode::SideTable);
    assert_eq!(stats.preserved_marks, 0);
}

#[test]
fn in_header_forwarding_preserves_hashes() {
    let stats = identity_hash_survives_move(ForwardingMode::InHeader);
    assert_eq!(stats.preserved_marks, 1);
}

#[test]
fn references_are_processed_by_strength() {
    let heap = test_heap(4, 1);
    let dead = |heap: &Heap| heap.allocate_instance(NO_CLASS, 1, 1).unwrap();

    let live = heap.allocate_instance(NO_CLASS, 0, 2).unwrap();
    let live_handle = keep(&heap, live);
    let weak_dead = keep(&heap, heap.allocate_reference(ReferenceType::Weak, dead(&heap), 0).unwrap());
    let weak_live = keep(&heap, heap.allocate_reference(ReferenceType::Weak, live, 0).unwrap());
    let soft = keep(&heap, heap.allocate_reference(ReferenceType::Soft, dead(&heap), 0).unwrap());
    let finalizable = dead(&heap);
    let finalizable_tail = heap.allocate_instance(NO_CLASS, 0, 2).unwrap();
    heap.store_field(finalizable, 0, finalizable_tail);
    let final_ref = keep(&heap, heap.allocate_reference(ReferenceType::Final, finalizable, 0).unwrap());
    let phantom = keep(&heap, heap.allocate_reference(ReferenceType::Phantom, dead(&heap), 0).unwrap());

    let stats = heap.do_full_collection(false, false);

    let referent = |handle: usize| kept(&heap, handle).referent_slot().load();
    assert!(referent(weak_dead).is_null());
    assert_eq!(referent(weak_live), kept(&heap, live_handle));
    assert!(!referent(soft).is_null());
    assert!(referent(phantom).is_null());
    let resurrected = referent(final_ref);
    assert!(!resurrected.is_null());
    assert!(!resurrected.load_field(0).is_null());

    assert_eq!(stats.references.cleared, 2);
    assert_eq!(stats.references.enqueued, 3);
    assert_eq!(stats.references.discovered(ReferenceType::Soft), 0);
    assert_eq!(stats.references.discovered(ReferenceType::Final), 1);
    let mut pending = heap.reference_pending_list().oops();
    pending.sort_unstable();
    let mut expected = vec![kept(&heap, weak_dead), kept(&heap, final_ref), kept(&heap, phantom)];
    expected.sort_unstable();
    assert_eq!(pending, expected);

    // Soft references only go when asked to.
    let stats = heap.do_full_collection(true, false);
    assert!(referent(soft).is_null());
    assert_eq!(stats.references.discovered(ReferenceType::Soft), 1);
    assert!(heap.reference_pending_list().oops().contains(&kept(&heap, soft)));
}

#[test]
fn unreachable_class_loaders_are_unloaded() {
    let heap = test_heap(4, 1);
    let graph = heap.class_loader_data_graph();
    let boot = heap.register_class("Boot", true);
    let temp = heap.register_class("Temp", false);

    let boot_mirror = heap.allocate_instance(NO_CLASS, 0, 2).unwrap();
    let boot_handle = graph.get(boot).unwrap().add_handle(boot_mirror);
    let temp_mirror = heap.allocate_instance(NO_CLASS, 0, 2).unwrap();
    graph.get(temp).unwrap().add_handle(temp_mirror);
    let instance = heap.allocate_instance(temp, 0, 2).unwrap();
    let instance_handle = keep(&heap, instance);

    let stats = heap.collect();
    assert_eq!(stats.classes_unloaded, 0);
    assert!(graph.is_alive(temp));
    assert_eq!(stats.objects_marked, 3);
    assert!(!graph.get(temp).unwrap().handles().get(0).is_null());

    heap.handles().set(instance_handle, Oop::NULL);
    let stats = heap.collect();
    assert_eq!(stats.classes_unloaded, 1);
    assert!(!graph.is_alive(temp));
    assert!(graph.get(temp).unwrap().handles().is_empty());
    assert_eq!(stats.objects_marked, 1);

    let boot_mirror = graph.get(boot).unwrap().handles().get(boot_handle);
    assert_eq!(boot_mirror.address(), heap.region(0).bottom());
}

#[test]
fn dense_regions_are_scrubbed_instead_of_compacted() {
    let heap = test_heap(4, 1);
    let a = heap.allocate_type_array(NO_CLASS, 250).unwrap();
    let gap = heap.allocate_instance(NO_CLASS, 0, 6).unwrap();
    let b = heap.allocate_type_array(NO_CLASS, 250).unwrap();
    assert_eq!(gap.address(), a.end());
    assert_eq!(b.address(), gap.end());
    assert_eq!(heap.region(0).free(), 0);
    let a_handle = keep(&heap, a);
    let b_handle = keep(&heap, b);

    let stats = heap.collect();

    assert!(stats.compaction_skipped);
    assert_eq!(stats.objects_moved, 0);
    assert_eq!(kept(&heap, a_handle), a);
    assert_eq!(kept(&heap, b_handle), b);
    let filler = Oop::from_address(a.end());
    assert!(filler.is_filler());
    assert_eq!(filler.size(), 8);
    assert!(heap.region(0).is_old());
    assert_eq!(heap.block_offset_table().block_start(b.address() - WORD_SIZE, heap.region(0).bottom()), filler.address());
}

#[test]
fn pinned_regions_keep_their_objects() {
    let heap = test_heap(4, 1);
    heap.allocate_instance(NO_CLASS, 0, 8).unwrap();
    let pinned = heap
        .allocate_pinned(Descriptor::new(ObjectKind::Instance, NO_CLASS, 0, 10))
        .unwrap();
    let handle = keep(&heap, pinned);

    let stats = heap.collect();

    assert_eq!(kept(&heap, handle), pinned);
    assert!(heap.region(0).has_pinned_objects());
    assert!(Oop::from_address(heap.region(0).bottom()).is_filler());
    assert!(stats.compaction_skipped);
}

#[test]
fn dead_pinned_humongous_objects_are_freed() {
    let heap = test_heap(4, 1);
    let words = heap.options().region_size_words + 10;
    let big = heap
        .allocate_pinned(Descriptor::new(ObjectKind::TypeArray, NO_CLASS, 0, words))
        .unwrap();
    let start = heap.region_index_for(big.address());
    assert!(heap.region(start).has_pinned_objects());

    heap.collect();

    assert!(heap.region(start).is_free() && heap.region(start + 1).is_free());
    assert!(!heap.region(start).has_pinned_objects());
}

#[test]
fn objects_are_marked_once_under_contention() {
    const NODES: usize = 200;
    let heap = heap_with(8, 4, |args| args.obj_array_marking_stride = 8);
    let nodes = (0..NODES)
        .map(|_| heap.allocate_instance(NO_CLASS, 2, 0).unwrap())
        .collect::<Vec<_>>();
    for (i, &node) in nodes.iter().enumerate() {
        heap.store_field(node, 0, nodes[(i * 7 + 3) % NODES]);
        heap.store_field(node, 1, nodes[(i * 13 + 5) % NODES]);
    }
    for _ in 0..2 {
        let array = heap.allocate_obj_array(NO_CLASS, NODES).unwrap();
        for (i, &node) in nodes.iter().enumerate() {
            heap.store_field(array, i, node);
        }
        keep(&heap, array);
    }
    for _ in 0..50 {
        heap.allocate_instance(NO_CLASS, 2, 0).unwrap();
    }

    let stats = heap.collect();

    assert_eq!(stats.workers, 4);
    assert_eq!(stats.objects_marked, NODES + 2);
    assert_eq!(stats.live_words, NODES * 4 + 2 * (HEADER_WORDS + NODES));

    let array = kept(&heap, 0);
    for i in 0..NODES {
        let node = array.load_field(i);
        assert_eq!(node.load_field(0), array.load_field((i * 7 + 3) % NODES));
        assert_eq!(node.load_field(1), array.load_field((i * 13 + 5) % NODES));
    }
    assert_eq!(kept(&heap, 1).load_field(NODES - 1), array.load_field(NODES - 1));
}

#[test]
fn cyclic_garbage_dies_and_weak_roots_follow_survivors() {
    let heap = test_heap(4, 2);
    let node = || heap.allocate_instance(NO_CLASS, 1, 1).unwrap();
    let d = node();
    let e = node();
    heap.store_field(d, 0, e);
    heap.store_field(e, 0, d);
    let a = node();
    let b = node();
    let c = node();
    heap.store_field(a, 0, b);
    heap.store_field(b, 0, c);
    heap.store_field(c, 0, a);
    let handle = keep(&heap, a);
    let weak_d = heap.weak_handles().push(d);
    let weak_b = heap.weak_handles().push(b);

    let stats = heap.collect();

    assert_eq!(stats.objects_marked, 3);
    assert_eq!(stats.weak_roots_cleared, 1);
    assert_eq!(stats.objects_moved, 3);
    assert!(heap.weak_handles().get(weak_d).is_null());

    let a = kept(&heap, handle);
    assert_eq!(a.address(), heap.region(0).bottom());
    let b = a.load_field(0);
    let c = b.load_field(0);
    assert_eq!(c.load_field(0), a);
    assert_eq!(heap.weak_handles().get(weak_b), b);
}

/// B's destination is dead space, A's destination is B's old address. A
/// rerun of phase 3 must not read B's rewritten field as a pointer to B.
fn second_adjust_pass_changes_nothing(mode: ForwardingMode) {
    let heap = heap_with(4, 2, |args| args.forwarding = mode);
    heap.allocate_instance(NO_CLASS, 0, 8).unwrap();
    let b = heap.allocate_instance(NO_CLASS, 1, 7).unwrap();
    let a = heap.allocate_instance(NO_CLASS, 1, 7).unwrap();
    a.set_raw_word(1, 0xa);
    heap.store_field(b, 0, a);
    // in-header forwarding preserves A's mark, its entry moves to B's old address
    let hash = heap.identity_hash(a);
    let b_handle = keep(&heap, b);

    let collector = manual_collector(&heap);
    collector.prepare_collection();
    collector.phase1_mark_live_objects();
    collector.phase2_prepare_compaction();
    assert!(collector.has_compaction_targets());
    collector.phase3_adjust_pointers();

    let bottom = heap.region(0).bottom();
    assert_eq!(kept(&heap, b_handle).address(), bottom);
    assert_eq!(b.load_field(0).address(), b.address());

    let adjusted = heap_words(&heap);
    collector.run_task(&AdjustTask::new(&collector));
    assert_eq!(heap_words(&heap), adjusted, "second adjust pass rewrote an adjusted slot");
    assert_eq!(kept(&heap, b_handle).address(), bottom);

    collector.phase4_do_compaction();
    // A lands on B's old address, so B has to be copied first
    assert_eq!(assert_copies_never_overwrite_unread_sources(&collector), 2);
    collector.phase5_reset_metadata();
    let stats = collector.complete_collection();
    assert_eq!(stats.objects_moved, 2);
    let b = kept(&heap, b_handle);
    let a = b.load_field(0);
    assert_eq!(a.address(), bottom + 10 * WORD_SIZE);
    assert_eq!(a.raw_word(1), 0xa);
    assert_eq!(heap.identity_hash(a), hash);
    assert_eq!(b.mark(), MarkWord::prototype());
}

#[test]
fn second_adjust_pass_changes_nothing_with_side_table() {
    second_adjust_pass_changes_nothing(ForwardingMode::SideTable);
}

#[test]
fn second_adjust_pass_changes_nothing_with_in_header_forwarding() {
    second_adjust_pass_changes_nothing(ForwardingMode::InHeader);
}

#[test]
fn compaction_points_fill_regions_in_order() {
    let heap = test_heap(6, 1);
    let mut handles = Vec::new();
    for region in 0..4 {
        for _ in 0..2 {
            let obj = heap.allocate_type_array(NO_CLASS, 98).unwrap();
            assert_eq!(heap.region_index_for(obj.address()), region);
            handles.push(keep(&heap, obj));
        }
        fill_with_garbage(&heap, region);
    }

    let collector = manual_collector(&heap);
    collector.prepare_collection();
    collector.phase1_mark_live_objects();
    collector.phase2_prepare_compaction();

    assert!(collector.attr_table().first_unclassified().is_none());
    for index in 0..heap.num_regions() {
        if collector.is_free(index) {
            assert_eq!(collector.live_words(index), 0);
        }
    }

    {
        let cp = collector.compaction_point(0).lock();
        assert_eq!(cp.regions(), &[0, 1, 2, 3, 4, 5]);
        let current = cp.current_region().unwrap();
        assert_eq!(current, 1);
        for &index in cp.regions() {
            let region = heap.region(index);
            let top = collector.compaction_top(index);
            assert!(top <= region.end());
            if index > current {
                assert_eq!(top, region.bottom());
            }
        }
        // the sixth array did not fit behind the first five
        assert_eq!(collector.compaction_top(0), heap.region(0).bottom() + 500 * WORD_SIZE);
        assert_eq!(collector.compaction_top(1), heap.region(1).bottom() + 300 * WORD_SIZE);
    }
    assert!(collector.serial_compaction_point().lock().regions().is_empty());

    collector.phase3_adjust_pointers();
    collector.phase4_do_compaction();
    collector.phase5_reset_metadata();
    let stats = collector.complete_collection();

    assert_eq!(stats.objects_moved, 6);
    assert_eq!(heap.region(0).top(), heap.region(0).bottom() + 500 * WORD_SIZE);
    assert_eq!(heap.region(1).top(), heap.region(1).bottom() + 300 * WORD_SIZE);
    assert!((2..6).all(|i| heap.region(i).is_free()));
    let addresses = handles.iter().map(|&h| kept(&heap, h).address()).collect::<Vec<_>>();
    assert!(addresses.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn failed_allocation_escalates_to_clearing_soft_references() {
    let heap = test_heap(4, 1);
    let region_words = heap.options().region_size_words;
    let cache = heap
        .allocate_type_array(NO_CLASS, region_words + 10 - HEADER_WORDS)
        .unwrap();
    assert!(heap.region(0).is_starts_humongous());
    let soft = keep(&heap, heap.allocate_reference(ReferenceType::Soft, cache, 0).unwrap());
    assert_eq!(heap.region_index_for(kept(&heap, soft).address()), 2);

    // Needs three adjacent free regions, only the maximal collection that
    // drops the soft referent can provide them.
    let big = heap
        .allocate_type_array(NO_CLASS, 2 * region_words + 10 - HEADER_WORDS)
        .unwrap();

    assert_eq!(heap.total_full_collections(), 2);
    assert_eq!(heap.region_index_for(big.address()), 1);
    let soft = kept(&heap, soft);
    assert_eq!(soft.address(), heap.region(0).bottom());
    assert!(soft.referent_slot().load().is_null());
}

#[test]
fn phases_run_in_order() {
    let heap = test_heap(4, 1);
    heap.allocate_instance(NO_CLASS, 0, 8).unwrap();
    let obj = heap.allocate_instance(NO_CLASS, 0, 8).unwrap();
    keep(&heap, obj);

    let stats = heap.collect();

    let phases = stats.phase_times.iter().map(|(name, _)| *name).collect::<Vec<_>>();
    assert_eq!(
        phases,
        [
            "Phase 1: Mark live objects",
            "Phase 2: Prepare compaction",
            "Phase 3: Adjust pointers",
            "Phase 4: Compact heap",
            "Phase 5: Reset Metadata",
        ]
    );
    assert_eq!(stats.gc_id, 1);
    assert_eq!(stats.cause, GCCause::Explicit);
    assert_eq!(stats.capacity, heap.capacity());

    let stats = heap.collect();
    assert_eq!(stats.gc_id, 2);
    assert_eq!(stats.objects_moved, 0);
}

#[test]
fn skipped_compaction_leaves_out_adjust_and_compact() {
    let heap = test_heap(4, 1);
    let stats = heap.collect();
    assert!(stats.compaction_skipped);
    let phases = stats.phase_times.iter().map(|(name, _)| *name).collect::<Vec<_>>();
    assert_eq!(
        phases,
        ["Phase 1: Mark live objects", "Phase 2: Prepare compaction", "Phase 5: Reset Metadata"]
    );
}

#[test]
#[should_panic(expected = "phase sequence violated")]
fn phases_cannot_go_backwards() {
    let heap = test_heap(4, 1);
    let collector = manual_collector(&heap);
    collector.prepare_collection();
    collector.phase1_mark_live_objects();
    collector.prepare_collection();
}

#[test]
fn remembered_sets_and_cards_are_reset() {
    let heap = test_heap(4, 1);
    let archive = heap.allocate_archive_region(false).unwrap();
    let target = heap
        .allocate_in_archive(archive, Descriptor::new(ObjectKind::Instance, NO_CLASS, 0, 4))
        .unwrap();
    let holder = heap.allocate_instance(NO_CLASS, 1, 0).unwrap();
    heap.store_field(holder, 0, target);
    keep(&heap, holder);
    assert_eq!(heap.remset(archive).occupied(), 1);

    heap.collect();

    assert_eq!(heap.remset(archive).occupied(), 0);
    assert_eq!(heap.card_table().count_dirty(heap.base(), heap.end()), 0);
}
