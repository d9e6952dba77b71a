//! Object layout understood by the collector.
//!
//! Every object starts with a two word header: the mark word followed by a
//! descriptor. The descriptor encodes the object kind, the defining class,
//! the number of leading reference fields and the total size in words. All
//! payload words after the header are either references or raw data.

use std::fmt;
use std::mem::size_of;
use std::sync::atomic::{AtomicUsize, Ordering};

use memoffset::offset_of;

pub const WORD_SIZE: usize = size_of::<usize>();
pub const LOG_WORD_SIZE: usize = WORD_SIZE.trailing_zeros() as usize;

#[repr(C)]
pub struct ObjectHeader {
    mark: AtomicUsize,
    descriptor: AtomicUsize,
}

pub const HEADER_WORDS: usize = size_of::<ObjectHeader>() / WORD_SIZE;
/// Smallest object (and therefore smallest filler) the heap can hold.
pub const MIN_OBJECT_WORDS: usize = HEADER_WORDS;

const MARK_WORD: usize = offset_of!(ObjectHeader, mark) / WORD_SIZE;
const DESCRIPTOR_WORD: usize = offset_of!(ObjectHeader, descriptor) / WORD_SIZE;

/// Identifier of the class an object is an instance of. `0` means the object
/// has no class that could ever be unloaded.
pub type ClassId = u16;

pub const NO_CLASS: ClassId = 0;
pub const MAX_CLASS_ID: ClassId = (1 << 12) - 1;

/// The first header word.
///
/// The two low bits are the lock bits: `01` for an unlocked object, `00` when
/// locked, `11` when the word holds a forwarding address installed by the
/// full collector. An unlocked word additionally carries the age in bits
/// `3..7` and the identity hash in bits `8..39`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MarkWord(usize);

impl MarkWord {
    pub const LOCK_MASK: usize = 0b11;
    pub const LOCKED_VALUE: usize = 0b00;
    pub const UNLOCKED_VALUE: usize = 0b01;
    pub const FORWARDED_VALUE: usize = 0b11;

    pub const AGE_SHIFT: usize = 3;
    pub const AGE_MASK: usize = 0xf;
    pub const HASH_SHIFT: usize = 8;
    pub const HASH_MASK: usize = (1 << 31) - 1;

    pub const fn prototype() -> Self {
        Self(Self::UNLOCKED_VALUE)
    }

    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> usize {
        self.0
    }

    pub const fn encode_forwarding(destination: usize) -> Self {
        Self(destination | Self::FORWARDED_VALUE)
    }

    pub const fn is_unlocked(self) -> bool {
        self.0 & Self::LOCK_MASK == Self::UNLOCKED_VALUE
    }

    pub const fn is_locked(self) -> bool {
        self.0 & Self::LOCK_MASK == Self::LOCKED_VALUE
    }

    pub const fn is_forwarded(self) -> bool {
        self.0 & Self::LOCK_MASK == Self::FORWARDED_VALUE
    }

    pub fn forwardee(self) -> usize {
        debug_assert!(self.is_forwarded(), "mark word {:?} does not hold a forwarding address", self);
        self.0 & !Self::LOCK_MASK
    }

    pub const fn hash(self) -> usize {
        (self.0 >> Self::HASH_SHIFT) & Self::HASH_MASK
    }

    pub const fn has_no_hash(self) -> bool {
        self.hash() == 0
    }

    pub const fn copy_set_hash(self, hash: usize) -> Self {
        let cleared = self.0 & !(Self::HASH_MASK << Self::HASH_SHIFT);
        Self(cleared | ((hash & Self::HASH_MASK) << Self::HASH_SHIFT))
    }

    pub const fn age(self) -> usize {
        (self.0 >> Self::AGE_SHIFT) & Self::AGE_MASK
    }

    pub const fn set_age(self, age: usize) -> Self {
        let cleared = self.0 & !(Self::AGE_MASK << Self::AGE_SHIFT);
        Self(cleared | ((age & Self::AGE_MASK) << Self::AGE_SHIFT))
    }

    pub const fn set_locked(self) -> Self {
        Self((self.0 & !Self::LOCK_MASK) | Self::LOCKED_VALUE)
    }

    /// Whether overwriting this word loses information the mutator can observe.
    /// Age is not worth keeping: a full collection resets it anyway.
    pub const fn must_be_preserved(self) -> bool {
        !self.is_unlocked() || !self.has_no_hash()
    }
}

impl fmt::Debug for MarkWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MarkWord({:#x})", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum ReferenceType {
    Soft,
    Weak,
    Final,
    Phantom,
}

impl ReferenceType {
    pub const ALL: [ReferenceType; 4] = [
        ReferenceType::Soft,
        ReferenceType::Weak,
        ReferenceType::Final,
        ReferenceType::Phantom,
    ];
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum ObjectKind {
    /// The first `num_refs` payload words are references.
    Instance,
    /// Every payload word is a reference.
    ObjArray,
    /// No references at all.
    TypeArray,
    /// Dead space kept parsable.
    Filler,
    /// Payload word 0 is the referent, handled by reference processing.
    Reference(ReferenceType),
}

impl ObjectKind {
    const fn tag(self) -> usize {
        match self {
            ObjectKind::Instance => 0,
            ObjectKind::ObjArray => 1,
            ObjectKind::TypeArray => 2,
            ObjectKind::Filler => 3,
            ObjectKind::Reference(ReferenceType::Soft) => 4,
            ObjectKind::Reference(ReferenceType::Weak) => 5,
            ObjectKind::Reference(ReferenceType::Final) => 6,
            ObjectKind::Reference(ReferenceType::Phantom) => 7,
        }
    }

    fn from_tag(tag: usize) -> Self {
        match tag {
            0 => ObjectKind::Instance,
            1 => ObjectKind::ObjArray,
            2 => ObjectKind::TypeArray,
            3 => ObjectKind::Filler,
            4 => ObjectKind::Reference(ReferenceType::Soft),
            5 => ObjectKind::Reference(ReferenceType::Weak),
            6 => ObjectKind::Reference(ReferenceType::Final),
            7 => ObjectKind::Reference(ReferenceType::Phantom),
            _ => panic!("corrupted object descriptor: unknown kind tag {}", tag),
        }
    }
}

/// Second header word: `kind:4 | class:12 | refs:16 | size:32`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Descriptor(usize);

impl Descriptor {
    const KIND_BITS: usize = 4;
    const CLASS_SHIFT: usize = 4;
    const CLASS_BITS: usize = 12;
    const REFS_SHIFT: usize = 16;
    const REFS_BITS: usize = 16;
    const SIZE_SHIFT: usize = 32;

    pub const MAX_REFS: usize = (1 << Self::REFS_BITS) - 1;
    pub const MAX_SIZE: usize = u32::MAX as usize;

    pub fn new(kind: ObjectKind, class: ClassId, num_refs: usize, size: usize) -> Self {
        assert!(class <= MAX_CLASS_ID, "class id {} out of range", class);
        assert!(num_refs <= Self::MAX_REFS, "too many reference fields: {}", num_refs);
        assert!(
            (MIN_OBJECT_WORDS..=Self::MAX_SIZE).contains(&size),
            "invalid object size: {} words",
            size
        );
        assert!(
            num_refs <= size - HEADER_WORDS,
            "{} reference fields do not fit in {} words",
            num_refs,
            size
        );
        Self(
            kind.tag()
                | (class as usize) << Self::CLASS_SHIFT
                | num_refs << Self::REFS_SHIFT
                | size << Self::SIZE_SHIFT,
        )
    }

    pub const fn raw(self) -> usize {
        self.0
    }

    pub fn kind(self) -> ObjectKind {
        ObjectKind::from_tag(self.0 & ((1 << Self::KIND_BITS) - 1))
    }

    pub const fn class_id(self) -> ClassId {
        ((self.0 >> Self::CLASS_SHIFT) & ((1 << Self::CLASS_BITS) - 1)) as ClassId
    }

    pub const fn num_refs(self) -> usize {
        (self.0 >> Self::REFS_SHIFT) & Self::MAX_REFS
    }

    pub const fn size(self) -> usize {
        self.0 >> Self::SIZE_SHIFT
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("kind", &self.kind())
            .field("class", &self.class_id())
            .field("refs", &self.num_refs())
            .field("size", &self.size())
            .finish()
    }
}

/// Address of a word holding a reference.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot(usize);

impl Slot {
    pub const fn from_address(address: usize) -> Self {
        Self(address)
    }

    pub fn from_atomic(cell: &AtomicUsize) -> Self {
        Self(cell as *const AtomicUsize as usize)
    }

    pub const fn address(self) -> usize {
        self.0
    }

    fn cell(self) -> &'static AtomicUsize {
        debug_assert!(self.0 != 0 && self.0 % WORD_SIZE == 0, "misaligned slot {:#x}", self.0);
        unsafe { &*(self.0 as *const AtomicUsize) }
    }

    pub fn load(self) -> Oop {
        Oop(self.cell().load(Ordering::Relaxed))
    }

    pub fn store(self, value: Oop) {
        self.cell().store(value.0, Ordering::Relaxed);
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot({:#x})", self.0)
    }
}

/// Visits reference slots.
pub trait OopClosure {
    fn do_oop(&mut self, slot: Slot);
}

impl<F: FnMut(Slot)> OopClosure for F {
    fn do_oop(&mut self, slot: Slot) {
        self(slot)
    }
}

/// A reference to an object start (or null).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Oop(usize);

impl Oop {
    pub const NULL: Oop = Oop(0);

    pub const fn from_address(address: usize) -> Self {
        Self(address)
    }

    pub const fn address(self) -> usize {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    fn word(self, index: usize) -> &'static AtomicUsize {
        debug_assert!(!self.is_null(), "dereferencing null oop");
        unsafe { &*((self.0 + index * WORD_SIZE) as *const AtomicUsize) }
    }

    /// Writes a fresh header at `address` and clears the payload.
    ///
    /// # Safety
    ///
    /// `address` must point at `descriptor.size()` writable heap words.
    pub unsafe fn initialize(address: usize, descriptor: Descriptor) -> Oop {
        let obj = Oop(address);
        obj.word(MARK_WORD).store(MarkWord::prototype().raw(), Ordering::Relaxed);
        obj.word(DESCRIPTOR_WORD).store(descriptor.raw(), Ordering::Relaxed);
        std::ptr::write_bytes(
            (address + HEADER_WORDS * WORD_SIZE) as *mut usize,
            0,
            descriptor.size() - HEADER_WORDS,
        );
        obj
    }

    /// Formats `[address, address + words)` as a single dead filler object.
    ///
    /// # Safety
    ///
    /// The range must be heap memory no live object overlaps.
    pub unsafe fn fill(address: usize, words: usize) -> Oop {
        let obj = Oop(address);
        obj.word(MARK_WORD).store(MarkWord::prototype().raw(), Ordering::Relaxed);
        obj.word(DESCRIPTOR_WORD).store(
            Descriptor::new(ObjectKind::Filler, NO_CLASS, 0, words).raw(),
            Ordering::Relaxed,
        );
        obj
    }

    pub fn mark(self) -> MarkWord {
        MarkWord(self.word(MARK_WORD).load(Ordering::Relaxed))
    }

    pub fn set_mark(self, mark: MarkWord) {
        self.word(MARK_WORD).store(mark.raw(), Ordering::Relaxed);
    }

    pub fn init_mark(self) {
        self.set_mark(MarkWord::prototype());
    }

    pub fn descriptor(self) -> Descriptor {
        Descriptor(self.word(DESCRIPTOR_WORD).load(Ordering::Relaxed))
    }

    pub fn size(self) -> usize {
        self.descriptor().size()
    }

    pub fn size_in_bytes(self) -> usize {
        self.size() * WORD_SIZE
    }

    pub fn end(self) -> usize {
        self.0 + self.size_in_bytes()
    }

    pub fn kind(self) -> ObjectKind {
        self.descriptor().kind()
    }

    pub fn class_id(self) -> ClassId {
        self.descriptor().class_id()
    }

    pub fn is_obj_array(self) -> bool {
        self.kind() == ObjectKind::ObjArray
    }

    pub fn is_filler(self) -> bool {
        self.kind() == ObjectKind::Filler
    }

    pub fn reference_type(self) -> Option<ReferenceType> {
        match self.kind() {
            ObjectKind::Reference(rt) => Some(rt),
            _ => None,
        }
    }

    pub fn payload_words(self) -> usize {
        self.size() - HEADER_WORDS
    }

    pub fn num_ref_fields(self) -> usize {
        let descriptor = self.descriptor();
        match descriptor.kind() {
            ObjectKind::ObjArray => descriptor.size() - HEADER_WORDS,
            ObjectKind::TypeArray | ObjectKind::Filler => 0,
            ObjectKind::Instance | ObjectKind::Reference(_) => descriptor.num_refs(),
        }
    }

    pub fn payload_slot(self, index: usize) -> Slot {
        Slot(self.0 + (HEADER_WORDS + index) * WORD_SIZE)
    }

    /// Reference field `index`.
    pub fn field(self, index: usize) -> Slot {
        assert!(
            index < self.num_ref_fields(),
            "field {} out of bounds for {:?}",
            index,
            self
        );
        self.payload_slot(index)
    }

    pub fn load_field(self, index: usize) -> Oop {
        self.field(index).load()
    }

    pub fn referent_slot(self) -> Slot {
        debug_assert!(self.reference_type().is_some(), "{:?} is not a reference object", self);
        self.payload_slot(0)
    }

    pub fn raw_word(self, index: usize) -> usize {
        self.word(HEADER_WORDS + index).load(Ordering::Relaxed)
    }

    pub fn set_raw_word(self, index: usize, value: usize) {
        assert!(index >= self.num_ref_fields() && index < self.payload_words());
        self.word(HEADER_WORDS + index).store(value, Ordering::Relaxed);
    }

    pub fn oop_iterate<C: OopClosure + ?Sized>(self, closure: &mut C) {
        for i in 0..self.num_ref_fields() {
            closure.do_oop(self.payload_slot(i));
        }
    }

    /// Visits array elements `[from, to)`.
    pub fn oop_iterate_range<C: OopClosure + ?Sized>(self, closure: &mut C, from: usize, to: usize) {
        debug_assert!(self.is_obj_array());
        debug_assert!(from <= to && to <= self.num_ref_fields());
        for i in from..to {
            closure.do_oop(self.payload_slot(i));
        }
    }

    /// Visits only the reference slots whose address lies in `[lo, hi)`.
    pub fn oop_iterate_bounded<C: OopClosure + ?Sized>(self, closure: &mut C, lo: usize, hi: usize) {
        let first = self.payload_slot(0).address();
        let count = self.num_ref_fields();
        let last = first + count * WORD_SIZE;
        let start = lo.max(first);
        let end = hi.min(last);
        if start >= end {
            return;
        }
        let from = (start - first + WORD_SIZE - 1) / WORD_SIZE;
        let to = (end - first + WORD_SIZE - 1) / WORD_SIZE;
        for i in from..to {
            closure.do_oop(self.payload_slot(i));
        }
    }

    /// Like [`Oop::oop_iterate`] but skips the referent of a reference object.
    pub fn oop_iterate_no_referent<C: OopClosure + ?Sized>(self, closure: &mut C) {
        let start = usize::from(self.reference_type().is_some());
        for i in start..self.num_ref_fields() {
            closure.do_oop(self.payload_slot(i));
        }
    }
}

impl fmt::Debug for Oop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oop({:#x})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_words<R>(words: usize, f: impl FnOnce(usize) -> R) -> R {
        let memory = (0..words).map(|_| AtomicUsize::new(0)).collect::<Vec<_>>();
        f(memory.as_ptr() as usize)
    }

    #[test]
    fn header_layout() {
        assert_eq!(HEADER_WORDS, 2);
        assert_eq!(MARK_WORD, 0);
        assert_eq!(DESCRIPTOR_WORD, 1);
    }

    #[test]
    fn descriptor_round_trips_fields() {
        let d = Descriptor::new(ObjectKind::Reference(ReferenceType::Final), 77, 3, 10);
        assert_eq!(d.kind(), ObjectKind::Reference(ReferenceType::Final));
        assert_eq!(d.class_id(), 77);
        assert_eq!(d.num_refs(), 3);
        assert_eq!(d.size(), 10);
    }

    #[test]
    fn mark_word_states() {
        let m = MarkWord::prototype();
        assert!(m.is_unlocked());
        assert!(!m.must_be_preserved());
        assert!(!m.set_age(3).must_be_preserved());
        let hashed = m.copy_set_hash(0x1234);
        assert_eq!(hashed.hash(), 0x1234);
        assert!(hashed.must_be_preserved());
        assert!(m.set_locked().must_be_preserved());

        let fwd = MarkWord::encode_forwarding(0x1000);
        assert!(fwd.is_forwarded());
        assert_eq!(fwd.forwardee(), 0x1000);
    }

    #[test]
    fn bounded_iteration_clips_to_range() {
        with_words(16, |base| {
            let obj = unsafe { Oop::initialize(base, Descriptor::new(ObjectKind::ObjArray, NO_CLASS, 0, 12)) };
            assert_eq!(obj.num_ref_fields(), 10);

            let mut visited = Vec::new();
            let lo = obj.payload_slot(3).address();
            let hi = obj.payload_slot(7).address();
            obj.oop_iterate_bounded(&mut |slot: Slot| visited.push(slot), lo, hi);
            assert_eq!(visited, (3..7).map(|i| obj.payload_slot(i)).collect::<Vec<_>>());

            let mut count = 0;
            obj.oop_iterate_bounded(&mut |_: Slot| count += 1, 0, base);
            assert_eq!(count, 0);
        });
    }

    #[test]
    fn reference_fields_skip_referent() {
        with_words(8, |base| {
            let obj = unsafe {
                Oop::initialize(
                    base,
                    Descriptor::new(ObjectKind::Reference(ReferenceType::Weak), NO_CLASS, 2, 5),
                )
            };
            let mut visited = Vec::new();
            obj.oop_iterate_no_referent(&mut |slot: Slot| visited.push(slot));
            assert_eq!(visited, vec![obj.payload_slot(1)]);
            assert_eq!(obj.referent_slot(), obj.payload_slot(0));
        });
    }
}
