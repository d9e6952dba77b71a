//! Card table maintained by the post-write barrier. The full collector only
//! ever resets it; it is rebuilt by the mutator afterwards.

use std::sync::atomic::{AtomicU8, Ordering};

use super::object::WORD_SIZE;

pub struct CardTable {
    base: usize,
    cards: Box<[AtomicU8]>,
}

impl CardTable {
    pub const CARD_SHIFT: usize = 9;
    pub const CARD_SIZE: usize = 1 << Self::CARD_SHIFT;
    pub const CARD_CLEAN: u8 = 0;
    pub const CARD_DIRTY: u8 = 0x70;

    pub fn new(base: usize, covered_words: usize) -> Self {
        let ncards = (covered_words * WORD_SIZE + Self::CARD_SIZE - 1) >> Self::CARD_SHIFT;
        Self {
            base,
            cards: (0..ncards).map(|_| AtomicU8::new(Self::CARD_CLEAN)).collect(),
        }
    }

    pub fn card_index(&self, addr: usize) -> usize {
        debug_assert!(addr >= self.base, "address {:#x} below card table", addr);
        (addr - self.base) >> Self::CARD_SHIFT
    }

    pub fn addr_for_card(&self, index: usize) -> usize {
        self.base + (index << Self::CARD_SHIFT)
    }

    pub fn get_card(&self, addr: usize) -> u8 {
        self.cards[self.card_index(addr)].load(Ordering::Relaxed)
    }

    pub fn is_dirty(&self, addr: usize) -> bool {
        self.get_card(addr) == Self::CARD_DIRTY
    }

    pub fn mark_card(&self, addr: usize) {
        self.cards[self.card_index(addr)].store(Self::CARD_DIRTY, Ordering::Relaxed);
    }

    pub fn clear_range(&self, start: usize, end: usize) {
        if start >= end {
            return;
        }
        let first = self.card_index(start);
        let last = self.card_index(end - 1);
        for card in &self.cards[first..=last] {
            card.store(Self::CARD_CLEAN, Ordering::Relaxed);
        }
    }

    pub fn count_dirty(&self, start: usize, end: usize) -> usize {
        if start >= end {
            return 0;
        }
        let first = self.card_index(start);
        let last = self.card_index(end - 1);
        self.cards[first..=last]
            .iter()
            .filter(|card| card.load(Ordering::Relaxed) == Self::CARD_DIRTY)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirty_and_clear() {
        let table = CardTable::new(0x1000, 4096);
        table.mark_card(0x1000 + 10 * CardTable::CARD_SIZE + 8);
        assert!(table.is_dirty(0x1000 + 10 * CardTable::CARD_SIZE));
        assert_eq!(table.count_dirty(0x1000, 0x1000 + 4096 * WORD_SIZE), 1);
        table.clear_range(0x1000, 0x1000 + 4096 * WORD_SIZE);
        assert_eq!(table.count_dirty(0x1000, 0x1000 + 4096 * WORD_SIZE), 0);
    }
}
