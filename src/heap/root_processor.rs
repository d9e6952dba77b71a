use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_deque::{Injector, Steal};
use parking_lot::RwLock;

use super::class_loader_data::{ClaimKind, ClassLoaderDataGraph};
use super::mark_bitmap::MarkBitmap;
use super::object::{Oop, OopClosure, Slot};

/// A source of references into the heap that lives outside of it.
pub trait Root: Send + Sync {
    fn name(&self) -> &str;
    fn abbreviated_name(&self) -> &str;

    fn oops_do(&self, closure: &mut dyn OopClosure);
}

/// A growable table of reference slots. Used for mutator handles, weak
/// handles, the reference pending list and class loader handles.
pub struct RootHandles {
    name: String,
    abbreviated_name: String,
    slots: RwLock<Vec<AtomicUsize>>,
}

impl RootHandles {
    pub fn new(name: impl Into<String>, abbreviated_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            abbreviated_name: abbreviated_name.into(),
            slots: RwLock::new(Vec::new()),
        }
    }

    /// Adds a slot holding `obj` and returns its index.
    pub fn push(&self, obj: Oop) -> usize {
        let mut slots = self.slots.write();
        slots.push(AtomicUsize::new(obj.address()));
        slots.len() - 1
    }

    pub fn get(&self, index: usize) -> Oop {
        Oop::from_address(self.slots.read()[index].load(Ordering::Relaxed))
    }

    pub fn set(&self, index: usize, obj: Oop) {
        self.slots.read()[index].store(obj.address(), Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    pub fn clear(&self) {
        self.slots.write().clear();
    }

    /// Snapshot of the non-null entries.
    pub fn oops(&self) -> Vec<Oop> {
        self.slots
            .read()
            .iter()
            .map(|slot| Oop::from_address(slot.load(Ordering::Relaxed)))
            .filter(|obj| !obj.is_null())
            .collect()
    }
}

impl Root for RootHandles {
    fn name(&self) -> &str {
        &self.name
    }

    fn abbreviated_name(&self) -> &str {
        &self.abbreviated_name
    }

    fn oops_do(&self, closure: &mut dyn OopClosure) {
        for slot in self.slots.read().iter() {
            closure.do_oop(Slot::from_atomic(slot));
        }
    }
}

/// Slots that do not keep their referent alive. After marking, slots
/// whose referent is dead are nulled.
pub struct WeakRootHandles {
    handles: RootHandles,
}

impl WeakRootHandles {
    pub fn new(name: impl Into<String>, abbreviated_name: impl Into<String>) -> Self {
        Self {
            handles: RootHandles::new(name, abbreviated_name),
        }
    }

    pub fn push(&self, obj: Oop) -> usize {
        self.handles.push(obj)
    }

    pub fn get(&self, index: usize) -> Oop {
        self.handles.get(index)
    }

    pub fn set(&self, index: usize, obj: Oop) {
        self.handles.set(index, obj)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn oops(&self) -> Vec<Oop> {
        self.handles.oops()
    }

    /// Nulls every slot whose referent is not marked. Returns how many were cleared.
    pub fn weak_oops_do(&self, bitmap: &MarkBitmap) -> usize {
        let mut cleared = 0;
        self.handles.oops_do(&mut |slot: Slot| {
            let obj = slot.load();
            if !obj.is_null() && !bitmap.is_marked_oop(obj) {
                slot.store(Oop::NULL);
                cleared += 1;
            }
        });
        cleared
    }
}

impl Root for WeakRootHandles {
    fn name(&self) -> &str {
        self.handles.name()
    }

    fn abbreviated_name(&self) -> &str {
        self.handles.abbreviated_name()
    }

    fn oops_do(&self, closure: &mut dyn OopClosure) {
        self.handles.oops_do(closure)
    }
}

pub enum RootTask<'a> {
    Root(Arc<dyn Root>),
    /// Handles owned by the heap itself, such as the reference pending list.
    Handles(&'a RootHandles),
    /// Class loader handles. `strong_only` restricts the walk to loaders
    /// that can never be unloaded.
    ClassLoaderData {
        graph: &'a ClassLoaderDataGraph,
        claim: ClaimKind,
        strong_only: bool,
    },
}

impl RootTask<'_> {
    pub fn name(&self) -> &str {
        match self {
            RootTask::Root(root) => root.name(),
            RootTask::Handles(handles) => handles.name(),
            RootTask::ClassLoaderData { .. } => "Class Loader Data Graph",
        }
    }

    fn execute(&self, closure: &mut dyn OopClosure) {
        match self {
            RootTask::Root(root) => root.oops_do(closure),
            RootTask::Handles(handles) => handles.oops_do(closure),
            RootTask::ClassLoaderData {
                graph,
                claim,
                strong_only,
            } => {
                if *strong_only {
                    graph.roots_cld_do(*claim, closure);
                } else {
                    graph.cld_do(*claim, closure);
                }
            }
        }
    }
}

/// Distributes root tasks among workers. Every task runs exactly once no
/// matter how many workers call [`RootProcessor::process`].
pub struct RootProcessor<'a> {
    tasks: Vec<RootTask<'a>>,
    injector: Injector<usize>,
}

impl<'a> RootProcessor<'a> {
    pub fn new(tasks: Vec<RootTask<'a>>) -> Self {
        let injector = Injector::new();
        for index in 0..tasks.len() {
            injector.push(index);
        }
        Self { tasks, injector }
    }

    pub fn num_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn process(&self, worker_id: usize, closure: &mut dyn OopClosure) {
        loop {
            match self.injector.steal() {
                Steal::Success(index) => {
                    let task = &self.tasks[index];
                    log::trace!(target: "gc-task", "Worker {} processing root {}", worker_id, task.name());
                    task.execute(closure);
                }
                Steal::Retry => continue,
                Steal::Empty => break,
            }
        }
    }
}
