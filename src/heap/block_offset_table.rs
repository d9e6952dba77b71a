//! Block offset table: lets heap walkers find the object covering an
//! arbitrary address without parsing the region from its bottom.

use std::sync::atomic::{AtomicU32, Ordering};

use super::object::{Oop, WORD_SIZE};

pub struct BlockOffsetTable {
    base: usize,
    covered_words: usize,
    /// For each card, how many words before the card start the covering block begins.
    entries: Box<[AtomicU32]>,
}

impl BlockOffsetTable {
    pub const CARD_SHIFT: usize = 9;
    pub const CARD_SIZE: usize = 1 << Self::CARD_SHIFT;

    pub fn new(base: usize, covered_words: usize) -> Self {
        let cards = (covered_words * WORD_SIZE + Self::CARD_SIZE - 1) >> Self::CARD_SHIFT;
        Self {
            base,
            covered_words,
            entries: (0..cards).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    fn end(&self) -> usize {
        self.base + self.covered_words * WORD_SIZE
    }

    fn card_index(&self, addr: usize) -> usize {
        debug_assert!(addr >= self.base && addr < self.end(), "address {:#x} outside BOT", addr);
        (addr - self.base) >> Self::CARD_SHIFT
    }

    fn card_start(&self, index: usize) -> usize {
        self.base + (index << Self::CARD_SHIFT)
    }

    /// Records that a block occupies `[start, end)`.
    pub fn update_for_block(&self, start: usize, end: usize) {
        debug_assert!(start < end && end <= self.end());
        // first card whose start lies inside the block
        let mut index = (start - self.base + Self::CARD_SIZE - 1) >> Self::CARD_SHIFT;
        while index < self.entries.len() {
            let card_start = self.card_start(index);
            if card_start >= end {
                break;
            }
            let back = (card_start - start) / WORD_SIZE;
            debug_assert!(back <= u32::MAX as usize, "block too large for the offset table");
            self.entries[index].store(back as u32, Ordering::Relaxed);
            index += 1;
        }
    }

    /// Start of the block containing `addr`, which must lie below the top of a
    /// parsable region.
    pub fn block_start(&self, addr: usize, region_bottom: usize) -> usize {
        let index = self.card_index(addr);
        let card_start = self.card_start(index);
        let back = self.entries[index].load(Ordering::Relaxed) as usize * WORD_SIZE;
        let mut cur = if card_start < region_bottom || card_start - back < region_bottom {
            region_bottom
        } else {
            card_start - back
        };

        loop {
            let next = Oop::from_address(cur).end();
            if next > addr {
                return cur;
            }
            cur = next;
        }
    }

    pub fn entry(&self, addr: usize) -> u32 {
        self.entries[self.card_index(addr)].load(Ordering::Relaxed)
    }

    pub fn clear_range(&self, start: usize, end: usize) {
        if start >= end {
            return;
        }
        let first = self.card_index(start);
        let last = self.card_index(end - WORD_SIZE);
        for entry in &self.entries[first..=last] {
            entry.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::object::{Descriptor, ObjectKind, NO_CLASS};
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn finds_block_starts_across_cards() {
        let words = 1024;
        let memory = (0..words).map(|_| AtomicUsize::new(0)).collect::<Vec<_>>();
        let base = memory.as_ptr() as usize;
        let bot = BlockOffsetTable::new(base, words);

        // 10 words, then a 200 word block straddling several cards, then 30 words.
        let sizes = [10, 200, 30];
        let mut cur = base;
        let mut starts = Vec::new();
        for size in sizes {
            unsafe {
                Oop::initialize(cur, Descriptor::new(ObjectKind::TypeArray, NO_CLASS, 0, size));
            }
            bot.update_for_block(cur, cur + size * WORD_SIZE);
            starts.push(cur);
            cur += size * WORD_SIZE;
        }

        assert_eq!(bot.block_start(base + 3 * WORD_SIZE, base), starts[0]);
        assert_eq!(bot.block_start(starts[1] + 150 * WORD_SIZE, base), starts[1]);
        assert_eq!(bot.block_start(starts[2] + WORD_SIZE, base), starts[2]);
        assert_eq!(bot.entry(base + BlockOffsetTable::CARD_SIZE), (BlockOffsetTable::CARD_SIZE / WORD_SIZE - 10) as u32);
    }
}
