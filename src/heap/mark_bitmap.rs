use std::sync::atomic::{AtomicUsize, Ordering};

use super::object::{Oop, LOG_WORD_SIZE, WORD_SIZE};

const BITS_PER_CELL: usize = usize::BITS as usize;

/// One mark bit per heap word. A set bit means "a live object starts here".
pub struct MarkBitmap {
    start: usize,
    covered_words: usize,
    cells: Box<[AtomicUsize]>,
}

impl MarkBitmap {
    pub fn new(start: usize, covered_words: usize) -> Self {
        let ncells = (covered_words + BITS_PER_CELL - 1) / BITS_PER_CELL;
        Self {
            start,
            covered_words,
            cells: (0..ncells).map(|_| AtomicUsize::new(0)).collect(),
        }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.start + self.covered_words * WORD_SIZE
    }

    #[inline]
    fn addr_to_offset(&self, addr: usize) -> usize {
        debug_assert!(
            addr >= self.start && addr <= self.end(),
            "address {:#x} not covered by mark bitmap [{:#x}, {:#x})",
            addr,
            self.start,
            self.end()
        );
        debug_assert!(addr % WORD_SIZE == 0, "unaligned address {:#x}", addr);
        (addr - self.start) >> LOG_WORD_SIZE
    }

    #[inline]
    fn offset_to_addr(&self, offset: usize) -> usize {
        self.start + (offset << LOG_WORD_SIZE)
    }

    #[inline]
    fn cell_and_mask(&self, addr: usize) -> (&AtomicUsize, usize) {
        let offset = self.addr_to_offset(addr);
        (
            &self.cells[offset / BITS_PER_CELL],
            1 << (offset % BITS_PER_CELL),
        )
    }

    pub fn is_marked(&self, addr: usize) -> bool {
        let (cell, mask) = self.cell_and_mask(addr);
        cell.load(Ordering::Acquire) & mask != 0
    }

    pub fn is_marked_oop(&self, obj: Oop) -> bool {
        self.is_marked(obj.address())
    }

    /// Sets the bit for `addr`. Returns true iff this call changed it, so
    /// exactly one of several racing markers wins.
    pub fn par_mark(&self, addr: usize) -> bool {
        let (cell, mask) = self.cell_and_mask(addr);
        if cell.load(Ordering::Relaxed) & mask != 0 {
            return false;
        }
        cell.fetch_or(mask, Ordering::AcqRel) & mask == 0
    }

    pub fn clear(&self, addr: usize) {
        let (cell, mask) = self.cell_and_mask(addr);
        cell.fetch_and(!mask, Ordering::AcqRel);
    }

    /// Clears all bits for `[start, end)`.
    pub fn clear_range(&self, start: usize, end: usize) {
        if start >= end {
            return;
        }
        let from = self.addr_to_offset(start);
        let to = self.addr_to_offset(end);

        let first_cell = from / BITS_PER_CELL;
        let last_cell = (to - 1) / BITS_PER_CELL;
        let head_mask = !0usize << (from % BITS_PER_CELL);
        let tail_mask = if to % BITS_PER_CELL == 0 {
            !0usize
        } else {
            !0usize >> (BITS_PER_CELL - to % BITS_PER_CELL)
        };

        if first_cell == last_cell {
            self.cells[first_cell].fetch_and(!(head_mask & tail_mask), Ordering::AcqRel);
            return;
        }

        self.cells[first_cell].fetch_and(!head_mask, Ordering::AcqRel);
        for cell in &self.cells[first_cell + 1..last_cell] {
            cell.store(0, Ordering::Relaxed);
        }
        self.cells[last_cell].fetch_and(!tail_mask, Ordering::AcqRel);
    }

    pub fn clear_all(&self) {
        for cell in self.cells.iter() {
            cell.store(0, Ordering::Relaxed);
        }
    }

    /// First marked address in `[addr, limit)`, or `limit` if there is none.
    pub fn get_next_marked_addr(&self, addr: usize, limit: usize) -> usize {
        if addr >= limit {
            return limit;
        }
        let from = self.addr_to_offset(addr);
        let to = self.addr_to_offset(limit);

        let mut index = from / BITS_PER_CELL;
        let mut bits = self.cells[index].load(Ordering::Acquire) & (!0usize << (from % BITS_PER_CELL));
        loop {
            if bits != 0 {
                let found = index * BITS_PER_CELL + bits.trailing_zeros() as usize;
                return if found < to {
                    self.offset_to_addr(found)
                } else {
                    limit
                };
            }
            index += 1;
            if index * BITS_PER_CELL >= to {
                return limit;
            }
            bits = self.cells[index].load(Ordering::Acquire);
        }
    }

    pub fn is_clear_range(&self, start: usize, end: usize) -> bool {
        self.get_next_marked_addr(start, end) == end
    }

    pub fn count_marked(&self, start: usize, end: usize) -> usize {
        let mut count = 0;
        let mut cur = self.get_next_marked_addr(start, end);
        while cur < end {
            count += 1;
            cur = self.get_next_marked_addr(cur + WORD_SIZE, end);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: usize = 0x10_0000;

    fn addr(word: usize) -> usize {
        BASE + word * WORD_SIZE
    }

    #[test]
    fn par_mark_wins_once() {
        let bitmap = MarkBitmap::new(BASE, 1024);
        assert!(!bitmap.is_marked(addr(5)));
        assert!(bitmap.par_mark(addr(5)));
        assert!(!bitmap.par_mark(addr(5)));
        assert!(bitmap.is_marked(addr(5)));
        bitmap.clear(addr(5));
        assert!(!bitmap.is_marked(addr(5)));
    }

    #[test]
    fn next_marked_respects_limit() {
        let bitmap = MarkBitmap::new(BASE, 1024);
        bitmap.par_mark(addr(3));
        bitmap.par_mark(addr(64));
        bitmap.par_mark(addr(700));

        assert_eq!(bitmap.get_next_marked_addr(addr(0), addr(1024)), addr(3));
        assert_eq!(bitmap.get_next_marked_addr(addr(4), addr(1024)), addr(64));
        assert_eq!(bitmap.get_next_marked_addr(addr(65), addr(1024)), addr(700));
        assert_eq!(bitmap.get_next_marked_addr(addr(65), addr(700)), addr(700));
        assert_eq!(bitmap.get_next_marked_addr(addr(65), addr(600)), addr(600));
        assert_eq!(bitmap.get_next_marked_addr(addr(701), addr(1024)), addr(1024));
        assert_eq!(bitmap.count_marked(addr(0), addr(1024)), 3);
    }

    #[test]
    fn clear_range_handles_partial_cells() {
        let bitmap = MarkBitmap::new(BASE, 1024);
        for i in 0..1024 {
            bitmap.par_mark(addr(i));
        }
        bitmap.clear_range(addr(10), addr(300));
        assert!(bitmap.is_marked(addr(9)));
        assert!(bitmap.is_clear_range(addr(10), addr(300)));
        assert!(bitmap.is_marked(addr(300)));

        bitmap.clear_range(addr(400), addr(410));
        assert!(bitmap.is_marked(addr(399)));
        assert!(bitmap.is_clear_range(addr(400), addr(410)));
        assert!(bitmap.is_marked(addr(410)));

        bitmap.clear_all();
        assert!(bitmap.is_clear_range(addr(0), addr(1024)));
    }
}
