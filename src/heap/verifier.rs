//! Heap verification around a full collection.
//!
//! Each pass walks the object graph from the strong roots, the permanent
//! class loaders and the reference pending list, collects every problem it
//! finds and panics with the list if there is any.

use std::collections::HashSet;

use super::heap::Heap;
use super::object::{ClassId, Oop, Slot, MIN_OBJECT_WORDS, NO_CLASS, WORD_SIZE};
use super::root_processor::Root;

/// Problems reported before the panic message gets truncated.
const MAX_REPORTED: usize = 16;

struct Reachability<'h> {
    heap: &'h Heap,
    visited: HashSet<Oop>,
    loaders: HashSet<ClassId>,
    stack: Vec<Oop>,
    errors: Vec<String>,
}

impl<'h> Reachability<'h> {
    fn new(heap: &'h Heap) -> Self {
        Self {
            heap,
            visited: HashSet::new(),
            loaders: HashSet::new(),
            stack: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn error(&mut self, message: String) {
        log::error!(target: "gc-verify", "{}", message);
        self.errors.push(message);
    }

    fn visit_field(&mut self, holder: Oop, slot: Slot) {
        let obj = slot.load();
        if obj.is_null() {
            return;
        }
        if let Err(problem) = check_oop(self.heap, obj) {
            self.error(format!("field {:?} of {:?} -> {:?}: {}", slot, holder, obj, problem));
            return;
        }
        if self.visited.insert(obj) {
            self.stack.push(obj);
        }
    }

    fn visit_loader(&mut self, class: ClassId) {
        if class == NO_CLASS || !self.loaders.insert(class) {
            return;
        }
        let cld = match self.heap.class_loader_data_graph().get(class) {
            Some(cld) => cld,
            None => {
                self.error(format!("object of unregistered class {}", class));
                return;
            }
        };
        if cld.is_unloaded() {
            self.error(format!("live object of unloaded class {} ({})", cld.name(), class));
            return;
        }
        for obj in cld.handles().oops() {
            self.visit_oop(obj, "class loader handle");
        }
    }

    fn visit_oop(&mut self, obj: Oop, what: &str) {
        if obj.is_null() {
            return;
        }
        if let Err(problem) = check_oop(self.heap, obj) {
            self.error(format!("{} -> {:?}: {}", what, obj, problem));
            return;
        }
        if self.visited.insert(obj) {
            self.stack.push(obj);
        }
    }

    /// Computes the transitive closure of the roots, following every
    /// reference field including referents.
    fn run(mut self) -> Self {
        let heap = self.heap;
        for root in heap.roots() {
            let mut oops = Vec::new();
            root.oops_do(&mut |slot: Slot| oops.push(slot.load()));
            for obj in oops {
                self.visit_oop(obj, root.name());
            }
        }
        for obj in heap.reference_pending_list().oops() {
            self.visit_oop(obj, "reference pending list");
        }
        for cld in heap.class_loader_data_graph().loaders() {
            if cld.is_permanent() {
                self.visit_loader(cld.id());
            }
        }

        while let Some(obj) = self.stack.pop() {
            self.visit_loader(obj.class_id());
            let mut slots = Vec::with_capacity(obj.num_ref_fields());
            obj.oop_iterate(&mut |slot: Slot| slots.push(slot));
            for slot in slots {
                self.visit_field(obj, slot);
            }
        }
        self
    }
}

/// Checks that `obj` is the start of an object in a used part of the heap.
fn check_oop(heap: &Heap, obj: Oop) -> Result<(), String> {
    let addr = obj.address();
    if !heap.is_in(addr) {
        return Err("points outside the heap".to_string());
    }
    if !super::is_aligned(addr, WORD_SIZE) {
        return Err("misaligned".to_string());
    }
    let region = heap.region_for(addr);
    if region.is_free() {
        return Err(format!("points into free {:?}", region));
    }
    if addr >= region.top() {
        return Err(format!("points above top of {:?}", region));
    }
    if region.is_humongous() {
        let start = heap.region(region.humongous_start_region()).bottom();
        if addr != start {
            return Err(format!("points into the middle of the humongous object at {:#x}", start));
        }
    } else {
        let block = heap.block_offset_table().block_start(addr, region.bottom());
        if block != addr {
            return Err(format!("points into the middle of the block at {:#x}", block));
        }
    }
    if obj.is_filler() {
        return Err("points at dead space".to_string());
    }
    Ok(())
}

/// Walks every region from bottom to top.
fn verify_regions(heap: &Heap, after_gc: bool, errors: &mut Vec<String>) {
    let bot = heap.block_offset_table();
    for region in heap.regions() {
        if region.is_free() {
            if region.top() != region.bottom() {
                errors.push(format!("free {:?} is not empty", region));
            }
            continue;
        }
        if region.is_continues_humongous() {
            continue;
        }

        let top = region.top();
        let mut cur = region.bottom();
        while cur < top {
            let obj = Oop::from_address(cur);
            if after_gc && obj.mark().is_forwarded() {
                errors.push(format!("{:?} in {:?} is still forwarded", obj, region));
                // the header no longer describes the object
                break;
            }
            let size = obj.size();
            if size < MIN_OBJECT_WORDS {
                errors.push(format!("{:?} in {:?} has bad size {}", obj, region, size));
                break;
            }
            if bot.block_start(cur, region.bottom()) != cur {
                errors.push(format!("block offset table does not find {:?} in {:?}", obj, region));
            }
            cur = obj.end();
            if region.is_starts_humongous() && cur > region.end() {
                break;
            }
        }
        if !region.is_starts_humongous() && cur != top {
            errors.push(format!("{:?} is not parsable: last object ends at {:#x}", region, cur));
        }
    }
}

fn report(label: &str, mut errors: Vec<String>) {
    if errors.is_empty() {
        log::debug!(target: "gc-verify", "Verifying {} passed", label);
        return;
    }
    let total = errors.len();
    errors.truncate(MAX_REPORTED);
    panic!(
        "heap verification {} failed with {} problems:\n{}",
        label,
        total,
        errors.join("\n")
    );
}

pub fn verify_before_gc(heap: &Heap) {
    log::info!(target: "gc-verify", "Verifying before GC");
    let walk = Reachability::new(heap).run();
    let mut errors = walk.errors;
    verify_regions(heap, false, &mut errors);
    report("before GC", errors);
}

/// Compares the mark bitmap with the objects reachable from the roots.
/// Runs after reference processing, so every referent still set is live.
pub fn verify_after_marking(heap: &Heap) {
    log::info!(target: "gc-verify", "Verifying after marking");
    let walk = Reachability::new(heap).run();
    let bitmap = heap.mark_bitmap();
    let mut errors = walk.errors;

    for obj in walk.visited.iter() {
        if !bitmap.is_marked_oop(*obj) {
            errors.push(format!("reachable {:?} is not marked", obj));
        }
    }
    let marked = bitmap.count_marked(heap.base(), heap.end());
    if marked != walk.visited.len() {
        errors.push(format!(
            "{} objects marked but {} reachable",
            marked,
            walk.visited.len()
        ));
    }
    log::debug!(target: "gc-verify", "{} reachable objects, {} marked", walk.visited.len(), marked);
    report("after marking", errors);
}

pub fn verify_after_gc(heap: &Heap) {
    log::info!(target: "gc-verify", "Verifying after GC");
    let walk = Reachability::new(heap).run();
    let mut errors = walk.errors;

    for weak in heap.weak_roots() {
        for obj in weak.oops() {
            if obj.is_null() {
                continue;
            }
            if let Err(problem) = check_oop(heap, obj) {
                errors.push(format!("weak root {} -> {:?}: {}", weak.name(), obj, problem));
            }
        }
    }

    verify_regions(heap, true, &mut errors);

    if !heap.mark_bitmap().is_clear_range(heap.base(), heap.end()) {
        errors.push("mark bitmap is not clear".to_string());
    }
    report("after GC", errors);
}
