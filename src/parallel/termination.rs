//! Cooperative cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag the host flips to stop a running computation.
///
/// Workers poll it once per outer loop iteration and stop without rolling
/// back what they already wrote.
#[derive(Debug, Clone, Default)]
pub struct TerminationFlag {
    terminated: Arc<AtomicBool>,
}

impl TerminationFlag {
    /// A flag that starts in the running state
    pub fn running() -> Self {
        Self::default()
    }

    pub fn terminate(&self) {
        if !self.terminated.swap(true, Ordering::AcqRel) {
            log::info!("Termination requested");
        }
    }

    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }
}
