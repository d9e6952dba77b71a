use fullgc::heap::object::{Oop, NO_CLASS};
use fullgc::{formatted_size, AllocationFailure, Heap, HeapArguments};

/// Builds a complete binary tree of `depth`. Nodes have two reference
/// fields and one data word holding the depth. Subtrees under
/// construction live in `scratch`, two handles per level, since any
/// allocation may move them.
fn bottom_up_tree(heap: &Heap, scratch: &[usize], depth: usize) -> Result<Oop, AllocationFailure> {
    let node = if depth == 0 {
        heap.allocate_instance(NO_CLASS, 2, 1)?
    } else {
        let (left_slot, right_slot) = (scratch[2 * depth], scratch[2 * depth + 1]);
        let left = bottom_up_tree(heap, scratch, depth - 1)?;
        heap.handles().set(left_slot, left);
        let right = bottom_up_tree(heap, scratch, depth - 1)?;
        heap.handles().set(right_slot, right);

        let node = heap.allocate_instance(NO_CLASS, 2, 1)?;
        heap.store_field(node, 0, heap.handles().get(left_slot));
        heap.store_field(node, 1, heap.handles().get(right_slot));
        heap.handles().set(left_slot, Oop::NULL);
        heap.handles().set(right_slot, Oop::NULL);
        node
    };
    node.set_raw_word(2, depth);
    Ok(node)
}

const MAX_DEPTH: usize = 14;

fn item_check(node: Oop) -> usize {
    let left = node.load_field(0);
    if left.is_null() {
        1
    } else {
        1 + item_check(left) + item_check(node.load_field(1))
    }
}

fn main() -> Result<(), AllocationFailure> {
    env_logger::init();

    let heap = Heap::new(HeapArguments::default());
    heap.print_heap_summary();

    let scratch = (0..2 * (MAX_DEPTH + 1))
        .map(|_| heap.handles().push(Oop::NULL))
        .collect::<Vec<_>>();

    let long_lived = bottom_up_tree(&heap, &scratch, MAX_DEPTH)?;
    let handle = heap.handles().push(long_lived);

    for depth in (4..=MAX_DEPTH).step_by(2) {
        let iterations = 1 << (MAX_DEPTH - depth + 4);
        let mut check = 0;
        for _ in 0..iterations {
            check += item_check(bottom_up_tree(&heap, &scratch, depth)?);
        }
        println!("{}\t trees of depth {}\t check: {}", iterations, depth, check);
    }

    let stats = heap.do_full_collection(true, true);
    println!(
        "GC({}) {} -> {} of {}, {} objects marked, {} moved, {} regions freed in {:.3}ms",
        stats.gc_id,
        formatted_size(stats.used_before),
        formatted_size(stats.used_after),
        formatted_size(stats.capacity),
        stats.objects_marked,
        stats.objects_moved,
        stats.regions_freed,
        stats.pause.as_secs_f64() * 1000.0
    );
    for (phase, time) in stats.phase_times.iter() {
        println!("  {}: {:.3}ms", phase, time.as_secs_f64() * 1000.0);
    }

    let long_lived = heap.handles().get(handle);
    println!("long lived tree of depth {}\t check: {}", MAX_DEPTH, item_check(long_lived));
    println!("{} full collections", heap.total_full_collections());
    Ok(())
}
