//! Memory estimation, admission control and allocation tracking

use crate::error::{GraphError, Result};
use serde::Serialize;
use std::fmt;
use std::ops::Add;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Lower and upper bound of the bytes a task will allocate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MemoryRange {
    pub min: u64,
    pub max: u64,
}

impl MemoryRange {
    /// A range with identical bounds
    pub fn of(bytes: u64) -> Self {
        Self { min: bytes, max: bytes }
    }

    pub fn between(min: u64, max: u64) -> Self {
        debug_assert!(min <= max);
        Self { min, max }
    }

    /// Scale both bounds, e.g. for per-worker structures
    pub fn times(self, factor: u64) -> Self {
        Self {
            min: self.min.saturating_mul(factor),
            max: self.max.saturating_mul(factor),
        }
    }
}

impl Add for MemoryRange {
    type Output = MemoryRange;

    fn add(self, other: Self) -> Self {
        Self {
            min: self.min.saturating_add(other.min),
            max: self.max.saturating_add(other.max),
        }
    }
}

impl fmt::Display for MemoryRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min == self.max {
            write!(f, "{}", human_readable(self.min))
        } else {
            write!(f, "[{} ... {}]", human_readable(self.min), human_readable(self.max))
        }
    }
}

/// Format a byte count with a binary unit
pub fn human_readable(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["Bytes", "KiB", "MiB", "GiB", "TiB", "PiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

/// Size of a graph as seen by estimation functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GraphDimensions {
    pub node_count: u64,
    pub relationship_count: u64,
}

impl GraphDimensions {
    pub fn new(node_count: u64, relationship_count: u64) -> Self {
        Self {
            node_count,
            relationship_count,
        }
    }
}

/// Refuse to start `task` when its worst case does not fit into `available` bytes
pub fn ensure_fits(task: &str, estimate: MemoryRange, available: u64) -> Result<()> {
    if estimate.max > available {
        log::warn!(
            "Refusing to run {}: estimated {} exceeds available {}",
            task,
            estimate,
            human_readable(available)
        );
        return Err(GraphError::ResourceExhaustion {
            task: task.to_string(),
            required: estimate.max,
            available,
        });
    }
    log::debug!("{} admitted with estimate {}", task, estimate);
    Ok(())
}

/// Shared counter of bytes allocated on behalf of a graph
#[derive(Debug, Clone, Default)]
pub struct AllocationTracker {
    bytes: Arc<AtomicU64>,
}

impl AllocationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn remove(&self, bytes: u64) {
        // Saturate so a double release never wraps around
        let _ = self
            .bytes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(bytes))
            });
    }

    /// Bytes currently accounted for
    pub fn tracked(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}
