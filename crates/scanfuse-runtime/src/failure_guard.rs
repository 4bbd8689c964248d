//! [`FailureGuard`] – bounded retry budget for scan acquisition.
//!
//! Counts consecutive acquisition failures. Any success resets the count;
//! reaching the threshold tells the caller to give up on the device.
//!
//! # Example
//!
//! ```rust
//! use scanfuse_runtime::failure_guard::{FailureGuard, Verdict};
//!
//! let mut guard = FailureGuard::new(3);
//!
//! assert_eq!(guard.record_failure(), Verdict::Retry);
//! assert_eq!(guard.record_failure(), Verdict::Retry);
//! guard.record_success();
//! assert_eq!(guard.record_failure(), Verdict::Retry); // streak restarted
//! assert_eq!(guard.record_failure(), Verdict::Retry);
//! assert_eq!(guard.record_failure(), Verdict::GiveUp);
//! ```

/// What the caller should do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Run the recovery sequence and try again.
    Retry,
    /// The retry budget is spent.
    GiveUp,
}

/// Consecutive-failure counter with a fixed threshold.
#[derive(Debug, Clone)]
pub struct FailureGuard {
    threshold: usize,
    consecutive: usize,
    total: usize,
}

impl FailureGuard {
    /// `threshold` is the number of back-to-back failures that exhausts the
    /// budget. A threshold of 0 is treated as 1.
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive: 0,
            total: 0,
        }
    }

    pub fn record_failure(&mut self) -> Verdict {
        self.consecutive += 1;
        self.total += 1;
        if self.is_exhausted() {
            Verdict::GiveUp
        } else {
            Verdict::Retry
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    pub fn is_exhausted(&self) -> bool {
        self.consecutive >= self.threshold
    }

    pub fn consecutive(&self) -> usize {
        self.consecutive
    }

    /// Failures seen over the guard's lifetime, including recovered ones.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }
}
