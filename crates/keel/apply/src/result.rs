//! Apply result accounting

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Outcome counters of one apply run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyResult {
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total: usize,
}

impl ApplyResult {
    /// Number of actions that have finished one way or another
    pub fn finished(&self) -> usize {
        self.success + self.failed + self.skipped
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}

/// Thread-safe counters updated by the executor while actions run
#[derive(Debug, Default)]
pub struct ApplyResultUpdater {
    success: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    total: AtomicUsize,
}

impl ApplyResultUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
    }

    pub fn add_success(&self) {
        self.success.fetch_add(1, Ordering::SeqCst);
    }

    pub fn add_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn add_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    /// Current counters; may be read while actions are still running
    pub fn snapshot(&self) -> ApplyResult {
        ApplyResult {
            success: self.success.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            total: self.total.load(Ordering::SeqCst),
        }
    }

    /// Final counters.
    ///
    /// # Panics
    ///
    /// Panics if some action was never accounted for. That can only happen
    /// through an executor bug.
    pub fn done(&self) -> ApplyResult {
        let result = self.snapshot();
        if result.finished() != result.total {
            panic!(
                "apply result mismatch: success {} + failed {} + skipped {} != total {}",
                result.success, result.failed, result.skipped, result.total
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_done_when_balanced() {
        let updater = ApplyResultUpdater::new();
        updater.set_total(3);
        updater.add_success();
        updater.add_failed();
        updater.add_skipped();

        let result = updater.done();
        assert_eq!(result.finished(), 3);
        assert!(!result.is_success());
    }

    #[test]
    #[should_panic(expected = "apply result mismatch")]
    fn test_done_panics_on_mismatch() {
        let updater = ApplyResultUpdater::new();
        updater.set_total(2);
        updater.add_success();
        updater.done();
    }
}
