//! Class metadata liveness.
//!
//! Every object names the class it is an instance of. Classes belong to a
//! class loader, which holds handles to heap objects (mirrors, constants).
//! A loader that is not permanent stays alive only while some marked object
//! is an instance of one of its classes. Loaders that nobody claimed during
//! marking are unloaded, dropping their handles.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::object::{ClassId, Oop, OopClosure, MAX_CLASS_ID, NO_CLASS};
use super::root_processor::{Root, RootHandles};

/// Which pass of a collection claimed a loader.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum ClaimKind {
    Mark = 1,
    Adjust = 2,
}

pub struct ClassLoaderData {
    id: ClassId,
    name: String,
    permanent: bool,
    handles: RootHandles,
    claim: AtomicU8,
    unloaded: AtomicBool,
}

impl ClassLoaderData {
    pub fn id(&self) -> ClassId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_permanent(&self) -> bool {
        self.permanent
    }

    pub fn is_unloaded(&self) -> bool {
        self.unloaded.load(Ordering::Acquire)
    }

    pub fn handles(&self) -> &RootHandles {
        &self.handles
    }

    pub fn add_handle(&self, obj: Oop) -> usize {
        assert!(!self.is_unloaded(), "class {} is unloaded", self.name);
        self.handles.push(obj)
    }

    /// Returns true for the first caller of a given pass.
    pub fn try_claim(&self, kind: ClaimKind) -> bool {
        let bit = kind as u8;
        self.claim.fetch_or(bit, Ordering::AcqRel) & bit == 0
    }

    pub fn is_claimed(&self, kind: ClaimKind) -> bool {
        self.claim.load(Ordering::Acquire) & kind as u8 != 0
    }

    pub fn clear_claim(&self) {
        self.claim.store(0, Ordering::Release);
    }

    pub fn oops_do(&self, closure: &mut dyn OopClosure) {
        self.handles.oops_do(closure);
    }
}

/// All registered class loaders, indexed by class id.
#[derive(Default)]
pub struct ClassLoaderDataGraph {
    clds: RwLock<Vec<Arc<ClassLoaderData>>>,
}

impl ClassLoaderDataGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a class and returns the id objects of that class carry.
    pub fn register(&self, name: impl Into<String>, permanent: bool) -> ClassId {
        let mut clds = self.clds.write();
        let id = clds.len() + 1;
        assert!(id <= MAX_CLASS_ID as usize, "too many classes");
        let name = name.into();
        clds.push(Arc::new(ClassLoaderData {
            id: id as ClassId,
            handles: RootHandles::new(format!("Class {}", name), "CLD"),
            name,
            permanent,
            claim: AtomicU8::new(0),
            unloaded: AtomicBool::new(false),
        }));
        id as ClassId
    }

    pub fn get(&self, id: ClassId) -> Option<Arc<ClassLoaderData>> {
        if id == NO_CLASS {
            return None;
        }
        self.clds.read().get(id as usize - 1).cloned()
    }

    pub fn len(&self) -> usize {
        self.clds.read().len()
    }

    /// Snapshot of every registered loader, claimed or not.
    pub fn loaders(&self) -> Vec<Arc<ClassLoaderData>> {
        self.clds.read().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.clds.read().is_empty()
    }

    pub fn is_alive(&self, id: ClassId) -> bool {
        id == NO_CLASS || self.get(id).map_or(false, |cld| !cld.is_unloaded())
    }

    /// Claims the loader of `id` for `kind` and returns it to the winner.
    pub fn try_claim(&self, id: ClassId, kind: ClaimKind) -> Option<Arc<ClassLoaderData>> {
        let cld = self.get(id)?;
        if cld.try_claim(kind) {
            Some(cld)
        } else {
            None
        }
    }

    /// Walks the handles of permanent loaders.
    pub fn roots_cld_do(&self, kind: ClaimKind, closure: &mut dyn OopClosure) {
        for cld in self.clds.read().iter() {
            if cld.permanent && !cld.is_unloaded() && cld.try_claim(kind) {
                cld.oops_do(closure);
            }
        }
    }

    /// Walks the handles of every loaded loader not yet claimed for `kind`.
    pub fn cld_do(&self, kind: ClaimKind, closure: &mut dyn OopClosure) {
        for cld in self.clds.read().iter() {
            if !cld.is_unloaded() && cld.try_claim(kind) {
                cld.oops_do(closure);
            }
        }
    }

    /// Unloads every loader marking did not reach. Returns the number unloaded.
    pub fn do_unloading(&self) -> usize {
        let mut unloaded = 0;
        for cld in self.clds.read().iter() {
            if cld.permanent || cld.is_unloaded() || cld.is_claimed(ClaimKind::Mark) {
                continue;
            }
            log::debug!(target: "gc", "Unloading class {} ({})", cld.name, cld.id);
            cld.unloaded.store(true, Ordering::Release);
            cld.handles.clear();
            unloaded += 1;
        }
        unloaded
    }

    pub fn clear_claimed_marks(&self) {
        for cld in self.clds.read().iter() {
            cld.clear_claim();
        }
    }
}
