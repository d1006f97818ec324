//! Operational counters shared between the capture path and the inference worker.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::admission::AdmissionDecision;

/// Atomic counters for coach metrics
#[derive(Debug, Default)]
pub struct AtomicCounters {
    pub frames_offered: AtomicUsize,
    pub frames_admitted: AtomicUsize,
    pub rejected_not_ready: AtomicUsize,
    pub rejected_busy: AtomicUsize,
    pub rejected_throttled: AtomicUsize,
    pub sessions_completed: AtomicUsize,
    pub sessions_failed: AtomicUsize,
}

impl AtomicCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one offered frame under its admission outcome.
    pub fn record_decision(&self, decision: &AdmissionDecision) -> usize {
        let bucket = match decision {
            AdmissionDecision::Admitted(_) => &self.frames_admitted,
            AdmissionDecision::RejectedNotReady => &self.rejected_not_ready,
            AdmissionDecision::RejectedBusy => &self.rejected_busy,
            AdmissionDecision::RejectedThrottled => &self.rejected_throttled,
        };
        bucket.fetch_add(1, Ordering::Relaxed);
        self.frames_offered.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_sessions_completed(&self) -> usize {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_sessions_failed(&self) -> usize {
        self.sessions_failed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> CoachStats {
        CoachStats {
            frames_offered: self.frames_offered.load(Ordering::Relaxed),
            frames_admitted: self.frames_admitted.load(Ordering::Relaxed),
            rejected_not_ready: self.rejected_not_ready.load(Ordering::Relaxed),
            rejected_busy: self.rejected_busy.load(Ordering::Relaxed),
            rejected_throttled: self.rejected_throttled.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`AtomicCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoachStats {
    pub frames_offered: usize,
    pub frames_admitted: usize,
    pub rejected_not_ready: usize,
    pub rejected_busy: usize,
    pub rejected_throttled: usize,
    pub sessions_completed: usize,
    pub sessions_failed: usize,
}

impl CoachStats {
    pub fn rejected(&self) -> usize {
        self.rejected_not_ready + self.rejected_busy + self.rejected_throttled
    }
}
