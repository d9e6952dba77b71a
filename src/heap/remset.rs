use std::collections::BTreeSet;

use parking_lot::Mutex;

/// Cards in other regions that may hold references into the owning region.
#[derive(Default)]
pub struct RememberedSet {
    cards: Mutex<BTreeSet<usize>>,
}

impl RememberedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_card(&self, card: usize) {
        self.cards.lock().insert(card);
    }

    pub fn contains_card(&self, card: usize) -> bool {
        self.cards.lock().contains(&card)
    }

    pub fn occupied(&self) -> usize {
        self.cards.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.lock().is_empty()
    }

    pub fn clear(&self) {
        self.cards.lock().clear();
    }
}
