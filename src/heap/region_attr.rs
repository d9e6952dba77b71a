use std::sync::atomic::{AtomicU8, Ordering};

/// What the full collector does with a region.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum RegionAttr {
    /// Live objects may move out of (and into) the region.
    Compacting = 0,
    /// Live objects stay where they are.
    SkipCompacting = 1,
    /// No live objects, available as a compaction target.
    Free = 2,
    /// Not yet classified in this collection.
    Invalid = 3,
}

impl RegionAttr {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RegionAttr::Compacting,
            1 => RegionAttr::SkipCompacting,
            2 => RegionAttr::Free,
            3 => RegionAttr::Invalid,
            _ => unreachable!("corrupted region attribute {}", value),
        }
    }
}

/// One attribute byte per region. Written by the orchestrating thread while
/// classifying regions, read by all workers afterwards.
pub struct RegionAttrTable {
    attrs: Box<[AtomicU8]>,
    region_shift: usize,
    heap_base: usize,
}

impl RegionAttrTable {
    pub fn new(num_regions: usize, heap_base: usize, region_shift: usize) -> Self {
        Self {
            attrs: (0..num_regions)
                .map(|_| AtomicU8::new(RegionAttr::Invalid as u8))
                .collect(),
            region_shift,
            heap_base,
        }
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn get(&self, index: usize) -> RegionAttr {
        RegionAttr::from_u8(self.attrs[index].load(Ordering::Acquire))
    }

    fn set(&self, index: usize, attr: RegionAttr) {
        self.attrs[index].store(attr as u8, Ordering::Release);
    }

    pub fn set_compacting(&self, index: usize) {
        self.set(index, RegionAttr::Compacting);
    }

    pub fn set_skip_compacting(&self, index: usize) {
        self.set(index, RegionAttr::SkipCompacting);
    }

    pub fn set_free(&self, index: usize) {
        self.set(index, RegionAttr::Free);
    }

    /// Humongous regions become movable only when a maximal compaction found
    /// a destination for their object.
    pub fn update_from_skip_to_compacting(&self, index: usize) {
        assert_eq!(
            self.get(index),
            RegionAttr::SkipCompacting,
            "region {} must be skip-compacting before it can be made compacting",
            index
        );
        self.set_compacting(index);
    }

    pub fn is_compacting(&self, index: usize) -> bool {
        self.get(index) == RegionAttr::Compacting
    }

    pub fn is_skip_compacting(&self, index: usize) -> bool {
        self.get(index) == RegionAttr::SkipCompacting
    }

    pub fn is_free(&self, index: usize) -> bool {
        self.get(index) == RegionAttr::Free
    }

    pub fn is_compaction_target(&self, index: usize) -> bool {
        matches!(self.get(index), RegionAttr::Compacting | RegionAttr::Free)
    }

    pub fn region_index_for(&self, addr: usize) -> usize {
        (addr - self.heap_base) >> self.region_shift
    }

    pub fn is_compacting_addr(&self, addr: usize) -> bool {
        self.is_compacting(self.region_index_for(addr))
    }

    /// Index of the first region without a valid attribute.
    pub fn first_unclassified(&self) -> Option<usize> {
        (0..self.len()).find(|&i| self.get(i) == RegionAttr::Invalid)
    }
}
