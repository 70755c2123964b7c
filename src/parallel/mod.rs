//! Parallel execution substrate: partitions, worker pool, cancellation and progress

pub mod executor;
pub mod partition;
pub mod progress;
pub mod termination;

pub use executor::WorkerPool;
pub use partition::{partition_index, range_partition, Partition, MAX_PARTITION_SIZE};
pub use progress::ProgressTracker;
pub use termination::TerminationFlag;
