//! A stop-the-world, parallel, compacting full collector for a region-based
//! heap.
//!
//! The collector runs five phases on a scoped worker pool (mark, prepare
//! compaction, adjust pointers, compact, reset metadata) bracketed by serial
//! setup and teardown. See
//! [`heap::full_gc`] for the phases and [`heap::heap::Heap`] for the heap
//! the collector operates on.

pub mod env;
pub mod heap;
pub mod utils;

pub use heap::full_gc::{FullGCStats, GCCause};
pub use heap::heap::{AllocationFailure, Heap};
pub use heap::region::HeapArguments;
pub use utils::formatted_size;
