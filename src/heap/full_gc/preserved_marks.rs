use parking_lot::Mutex;

use super::forwarding::ForwardingTable;
use crate::heap::object::{MarkWord, Oop};

/// Mark words overwritten by forwarding pointers that have to be put back
/// once the collection is done.
#[derive(Default)]
pub struct PreservedMarks {
    stack: Vec<(Oop, MarkWord)>,
    adjusted: bool,
}

impl PreservedMarks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_if_necessary(&mut self, obj: Oop, mark: MarkWord) {
        if mark.must_be_preserved() {
            self.stack.push((obj, mark));
        }
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Points every entry at the address its object is about to move to.
    /// Only the first call per collection rewrites anything.
    pub fn adjust_during_full_gc(&mut self, forwarding: &ForwardingTable) {
        if std::mem::replace(&mut self.adjusted, true) {
            return;
        }
        for (obj, _) in self.stack.iter_mut() {
            if let Some(forwardee) = forwarding.forwardee(*obj) {
                *obj = forwardee;
            }
        }
    }

    pub fn restore(&mut self) {
        self.adjusted = false;
        for (obj, mark) in self.stack.drain(..) {
            obj.set_mark(mark);
        }
    }
}

/// One stack per worker plus one for the serial phases.
pub struct PreservedMarksSet {
    stacks: Box<[Mutex<PreservedMarks>]>,
}

impl PreservedMarksSet {
    pub fn new(n: usize) -> Self {
        Self {
            stacks: (0..n).map(|_| Mutex::new(PreservedMarks::new())).collect(),
        }
    }

    pub fn num(&self) -> usize {
        self.stacks.len()
    }

    pub fn get(&self, index: usize) -> &Mutex<PreservedMarks> {
        &self.stacks[index]
    }

    pub fn size(&self) -> usize {
        self.stacks.iter().map(|s| s.lock().len()).sum()
    }

    /// Restores all stacks. Returns the number of marks restored.
    pub fn restore(&self) -> usize {
        let mut total = 0;
        for stack in self.stacks.iter() {
            let mut stack = stack.lock();
            total += stack.len();
            stack.restore();
        }
        total
    }
}
