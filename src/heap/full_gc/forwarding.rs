//! Where a live object will move to.
//!
//! Two encodings are supported. The side table keeps the mapping in
//! per-region hash maps and never touches object headers. The in-header
//! encoding overwrites the mark word with the destination and relies on
//! [`PreservedMarks`] to bring back marks the mutator cares about.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::preserved_marks::PreservedMarks;
use crate::heap::object::{MarkWord, Oop};

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub enum ForwardingMode {
    #[default]
    SideTable,
    InHeader,
}

pub struct ForwardingTable {
    mode: ForwardingMode,
    heap_base: usize,
    region_shift: usize,
    tables: Box<[RwLock<HashMap<usize, usize>>]>,
}

impl ForwardingTable {
    pub fn new(mode: ForwardingMode, heap_base: usize, region_shift: usize, num_regions: usize) -> Self {
        let tables = match mode {
            ForwardingMode::SideTable => (0..num_regions).map(|_| RwLock::new(HashMap::new())).collect(),
            ForwardingMode::InHeader => Box::default(),
        };
        Self {
            mode,
            heap_base,
            region_shift,
            tables,
        }
    }

    pub fn mode(&self) -> ForwardingMode {
        self.mode
    }

    fn table(&self, obj: Oop) -> &RwLock<HashMap<usize, usize>> {
        &self.tables[(obj.address() - self.heap_base) >> self.region_shift]
    }

    /// Records that `obj` moves to `destination`. Marks that would be lost
    /// by the in-header encoding are saved in `preserved`.
    pub fn forward_to(&self, obj: Oop, destination: usize, preserved: &mut PreservedMarks) {
        debug_assert_ne!(obj.address(), destination, "forwarding {:?} to itself", obj);
        match self.mode {
            ForwardingMode::SideTable => {
                self.table(obj).write().insert(obj.address(), destination);
            }
            ForwardingMode::InHeader => {
                let mark = obj.mark();
                if !mark.is_forwarded() {
                    preserved.push_if_necessary(obj, mark);
                }
                obj.set_mark(MarkWord::encode_forwarding(destination));
            }
        }
    }

    /// Drops a forwarding installed earlier in this collection.
    pub fn clear_forwarding(&self, obj: Oop) {
        match self.mode {
            ForwardingMode::SideTable => {
                self.table(obj).write().remove(&obj.address());
            }
            ForwardingMode::InHeader => {
                if obj.mark().is_forwarded() {
                    obj.init_mark();
                }
            }
        }
    }

    pub fn is_forwarded(&self, obj: Oop) -> bool {
        match self.mode {
            ForwardingMode::SideTable => self.table(obj).read().contains_key(&obj.address()),
            ForwardingMode::InHeader => obj.mark().is_forwarded(),
        }
    }

    pub fn forwardee(&self, obj: Oop) -> Option<Oop> {
        match self.mode {
            ForwardingMode::SideTable => self.table(obj).read().get(&obj.address()).copied().map(Oop::from_address),
            ForwardingMode::InHeader => {
                let mark = obj.mark();
                if mark.is_forwarded() {
                    Some(Oop::from_address(mark.forwardee()))
                } else {
                    None
                }
            }
        }
    }

    /// Number of side table entries. Always zero for the in-header encoding.
    pub fn len(&self) -> usize {
        self.tables.iter().map(|t| t.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        for table in self.tables.iter() {
            table.write().clear();
        }
    }
}
