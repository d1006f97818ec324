//! Frame admission
//!
//! Decides, for every captured frame, whether it starts an analysis. The
//! decision is synchronous and O(1) so it can run on the capture thread.
//! Rejected frames are dropped by the caller; nothing is queued.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

use crate::model_runtime::{ImageFrame, ModelKind, ModelLifecycleManager};

#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Minimum spacing between two admissions, measured admission to admission.
    pub min_interval: Duration,
    /// Handle that must be `ready` before frames are admitted.
    pub model: ModelKind,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(3000),
            model: ModelKind::Vision,
        }
    }
}

/// An admitted frame on its way to the inference worker.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    sequence: u64,
    admitted_at: Instant,
    frame: ImageFrame,
}

impl AnalysisRequest {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn admitted_at(&self) -> Instant {
        self.admitted_at
    }

    pub fn frame(&self) -> &ImageFrame {
        &self.frame
    }

    pub fn into_frame(self) -> ImageFrame {
        self.frame
    }
}

#[derive(Debug)]
pub enum AdmissionDecision {
    Admitted(AnalysisRequest),
    RejectedNotReady,
    RejectedBusy,
    RejectedThrottled,
}

impl AdmissionDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, AdmissionDecision::Admitted(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            AdmissionDecision::Admitted(_) => "admitted",
            AdmissionDecision::RejectedNotReady => "not_ready",
            AdmissionDecision::RejectedBusy => "busy",
            AdmissionDecision::RejectedThrottled => "throttled",
        }
    }
}

#[derive(Debug)]
struct AdmissionState {
    last_admission: Option<Instant>,
    in_flight: Option<u64>,
    next_sequence: u64,
}

pub struct FrameAdmissionController {
    models: Arc<ModelLifecycleManager>,
    config: AdmissionConfig,
    state: Mutex<AdmissionState>,
}

impl FrameAdmissionController {
    pub fn new(models: Arc<ModelLifecycleManager>, config: AdmissionConfig) -> Self {
        Self {
            models,
            config,
            state: Mutex::new(AdmissionState {
                last_admission: None,
                in_flight: None,
                next_sequence: 1,
            }),
        }
    }

    pub fn offer(&self, frame: ImageFrame) -> AdmissionDecision {
        self.offer_at(frame, Instant::now())
    }

    /// Same as [`offer`](Self::offer) with an explicit clock reading.
    pub fn offer_at(&self, frame: ImageFrame, now: Instant) -> AdmissionDecision {
        if !self.models.is_ready(self.config.model) {
            trace!("Frame rejected: {} model not ready", self.config.model);
            return AdmissionDecision::RejectedNotReady;
        }

        let mut state = self.state.lock();
        if let Some(sequence) = state.in_flight {
            trace!("Frame rejected: analysis #{} in flight", sequence);
            return AdmissionDecision::RejectedBusy;
        }
        if let Some(last) = state.last_admission {
            if now.saturating_duration_since(last) < self.config.min_interval {
                trace!("Frame rejected: throttled");
                return AdmissionDecision::RejectedThrottled;
            }
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.last_admission = Some(now);
        state.in_flight = Some(sequence);

        AdmissionDecision::Admitted(AnalysisRequest { sequence, admitted_at: now, frame })
    }

    /// Releases the in-flight slot held by `sequence`. Returns `false` when
    /// that sequence does not hold the slot.
    pub fn complete(&self, sequence: u64) -> bool {
        let mut state = self.state.lock();
        if state.in_flight == Some(sequence) {
            state.in_flight = None;
            true
        } else {
            warn!("complete(#{}) ignored, in flight: {:?}", sequence, state.in_flight);
            false
        }
    }

    pub fn in_flight(&self) -> Option<u64> {
        self.state.lock().in_flight
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }
}
