//! Paged arrays and memory accounting

pub mod estimate;
pub mod huge_array;

pub use estimate::{ensure_fits, AllocationTracker, GraphDimensions, MemoryRange};
pub use huge_array::{
    HugeArray, HugeAtomicDoubleArray, HugeAtomicLongArray, HugeDoubleArray, HugeIntArray,
    HugeLongArray,
};
