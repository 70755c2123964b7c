//! Progress reporting for long running tasks

use std::sync::atomic::{AtomicU64, Ordering};

/// Counts processed units and logs whenever another `granularity` percent is done.
///
/// Purely observational: nothing ever waits on it.
#[derive(Debug)]
pub struct ProgressTracker {
    task: String,
    volume: u64,
    granularity: u64,
    progress: AtomicU64,
    next_percent: AtomicU64,
}

impl ProgressTracker {
    pub fn new(task: impl Into<String>, volume: u64) -> Self {
        Self::with_granularity(task, volume, 10)
    }

    /// Tracker logging every `granularity` percent (clamped to 1..=100)
    pub fn with_granularity(task: impl Into<String>, volume: u64, granularity: u64) -> Self {
        let granularity = granularity.clamp(1, 100);
        Self {
            task: task.into(),
            volume,
            granularity,
            progress: AtomicU64::new(0),
            next_percent: AtomicU64::new(granularity),
        }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    /// Units reported so far
    pub fn progress(&self) -> u64 {
        self.progress.load(Ordering::Relaxed)
    }

    pub fn begin(&self) {
        log::info!("{} :: Start", self.task);
    }

    /// Report `units` more processed units
    pub fn log_progress(&self, units: u64) {
        if units == 0 {
            return;
        }
        let done = self.progress.fetch_add(units, Ordering::Relaxed) + units;
        if self.volume == 0 {
            return;
        }
        let percent = (done.min(self.volume) * 100) / self.volume;

        let mut next = self.next_percent.load(Ordering::Relaxed);
        while percent >= next && next <= 100 {
            // Only the worker that moves the threshold logs it
            let moved = (percent / self.granularity + 1) * self.granularity;
            match self.next_percent.compare_exchange(
                next,
                moved,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    log::info!("{} {}%", self.task, percent);
                    return;
                }
                Err(current) => next = current,
            }
        }
    }

    pub fn end(&self) {
        log::info!("{} :: Finished", self.task);
    }
}
