use super::preserved_marks::PreservedMarks;
use super::FullCollector;
use crate::heap::object::{Oop, WORD_SIZE};

/// Turns a stream of live objects into destination addresses inside an
/// ascending list of target regions.
///
/// `compaction_top` only grows while a region is current, and the point
/// moves to the next region only once an object does not fit anymore.
#[derive(Default, Debug)]
pub struct CompactionPoint {
    regions: Vec<usize>,
    cursor: usize,
    current: Option<usize>,
    compaction_top: usize,
}

impl CompactionPoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.current.is_some()
    }

    pub fn has_regions(&self) -> bool {
        !self.regions.is_empty()
    }

    pub fn regions(&self) -> &[usize] {
        &self.regions
    }

    pub fn current_region(&self) -> Option<usize> {
        self.current
    }

    pub fn compaction_top(&self) -> usize {
        self.compaction_top
    }

    /// Makes `region`, which must already be in the list, the current
    /// region and continues at its recorded compaction top.
    pub fn initialize(&mut self, collector: &FullCollector<'_>, region: usize) {
        self.cursor = match self.regions.iter().position(|&r| r == region) {
            Some(cursor) => cursor,
            None => panic!("region {} is not part of this compaction point", region),
        };
        self.current = Some(region);
        self.compaction_top = collector.compaction_top(region);
    }

    pub fn add(&mut self, region: usize) {
        debug_assert!(
            self.regions.last().map_or(true, |&last| last < region),
            "compaction regions must be added in ascending order: {:?} then {}",
            self.regions,
            region
        );
        self.regions.push(region);
    }

    /// Saves the compaction top of the current region.
    pub fn update(&self, collector: &FullCollector<'_>) {
        if let Some(current) = self.current {
            collector.set_compaction_top(current, self.compaction_top);
        }
    }

    fn switch_region(&mut self, collector: &FullCollector<'_>) {
        self.update(collector);
        self.cursor += 1;
        let next = match self.regions.get(self.cursor) {
            Some(&next) => next,
            None => panic!(
                "compaction point ran out of target regions after region {:?}",
                self.current
            ),
        };
        self.current = Some(next);
        self.compaction_top = collector.compaction_top(next);
    }

    /// Assigns `obj` the next `size` words of space. An object that would
    /// land on itself is left unforwarded.
    pub fn forward(
        &mut self,
        collector: &FullCollector<'_>,
        obj: Oop,
        size: usize,
        preserved: &mut PreservedMarks,
    ) {
        let heap = collector.heap();
        let bytes = size * WORD_SIZE;
        loop {
            let current = match self.current {
                Some(current) => current,
                None => panic!("forwarding {:?} through an uninitialized compaction point", obj),
            };
            if heap.region(current).end() - self.compaction_top >= bytes {
                break;
            }
            self.switch_region(collector);
        }

        if obj.address() != self.compaction_top {
            collector.forwarding().forward_to(obj, self.compaction_top, preserved);
        } else {
            collector.forwarding().clear_forwarding(obj);
        }

        heap.block_offset_table()
            .update_for_block(self.compaction_top, self.compaction_top + bytes);
        self.compaction_top += bytes;
    }

    /// Drops every region with index `bottom` or above. The point is not
    /// usable for forwarding afterwards.
    pub fn remove_at_or_above(&mut self, bottom: usize) {
        if let Some(current) = self.current {
            assert!(
                current >= bottom,
                "truncating at region {} would drop regions below the current region {}",
                bottom,
                current
            );
        }
        self.regions.retain(|&r| r < bottom);
        self.current = None;
        self.cursor = 0;
    }

    /// Index into the region list of the first of `num` consecutive regions
    /// usable for the humongous object starting at region `start`. The run
    /// may end right below `start` and continue into the object's own
    /// regions.
    pub fn find_contiguous_before(&self, start: usize, num: usize) -> Option<usize> {
        assert!(num > 0 && self.has_regions());
        if num == 1 {
            return Some(0);
        }

        let mut contiguous = 1;
        let mut range_end = 1;
        while range_end < self.regions.len() {
            if contiguous == num {
                break;
            }
            contiguous = if self.regions[range_end] - self.regions[range_end - 1] == 1 {
                contiguous + 1
            } else {
                1
            };
            range_end += 1;
        }

        if contiguous < num && start - self.regions[range_end - 1] != 1 {
            return None;
        }
        Some(range_end - contiguous)
    }

    /// Picks a destination for the humongous object starting at region
    /// `start`. Returns false if it has to stay.
    pub fn forward_humongous(
        &mut self,
        collector: &FullCollector<'_>,
        start: usize,
        preserved: &mut PreservedMarks,
    ) -> bool {
        let heap = collector.heap();
        let region = heap.region(start);
        assert!(region.is_starts_humongous(), "{:?} does not start a humongous object", region);
        let obj = Oop::from_address(region.bottom());
        let num = heap.options().required_regions(obj.size());

        if !self.has_regions() {
            return false;
        }
        let range_begin = match self.find_contiguous_before(start, num) {
            Some(range_begin) => range_begin,
            None => return false,
        };

        let destination = heap.region(self.regions[range_begin]).bottom();
        collector.forwarding().forward_to(obj, destination, preserved);
        log::debug!(
            target: "gc-phases",
            "GC({}) Humongous object {:?} in regions [{}, {}] moves to region {}",
            collector.scope().gc_id(),
            obj,
            start,
            start + num - 1,
            self.regions[range_begin]
        );

        self.add_humongous(collector, start, num);
        self.remove_range(range_begin, range_begin + num);
        true
    }

    fn add_humongous(&mut self, collector: &FullCollector<'_>, start: usize, num: usize) {
        collector.add_humongous_region(start);
        for region in start..start + num {
            self.add(region);
            collector.attr_table().update_from_skip_to_compacting(region);
        }
    }

    pub fn remove_range(&mut self, from: usize, to: usize) {
        self.regions.drain(from..to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(regions: &[usize]) -> CompactionPoint {
        let mut cp = CompactionPoint::new();
        for &r in regions {
            cp.add(r);
        }
        cp
    }

    #[test]
    fn contiguous_run_search() {
        let cp = point(&[1, 3, 4, 5, 8]);
        assert_eq!(cp.find_contiguous_before(10, 1), Some(0));
        assert_eq!(cp.find_contiguous_before(10, 3), Some(1));
        assert_eq!(cp.find_contiguous_before(10, 4), None);
        assert_eq!(cp.find_contiguous_before(9, 2), Some(1));
    }

    #[test]
    fn run_may_extend_into_the_object_itself() {
        // one free region directly below a two-region object at 2..=3
        let cp = point(&[1]);
        assert_eq!(cp.find_contiguous_before(2, 2), Some(0));

        let cp = point(&[0]);
        assert_eq!(cp.find_contiguous_before(2, 2), None);
    }

    #[test]
    fn truncation_keeps_lower_regions() {
        let mut cp = point(&[0, 2, 4, 6]);
        cp.remove_at_or_above(4);
        assert_eq!(cp.regions(), &[0, 2]);
        assert!(!cp.is_initialized());
        cp.remove_at_or_above(0);
        assert!(!cp.has_regions());
    }

    #[test]
    fn remove_range_drops_covered_candidates() {
        let mut cp = point(&[1, 2, 3, 7]);
        cp.remove_range(0, 2);
        assert_eq!(cp.regions(), &[3, 7]);
    }
}
