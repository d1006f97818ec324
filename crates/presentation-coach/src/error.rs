//! Error taxonomy for the coaching core.
//!
//! Admission rejections are not errors (see [`crate::admission::AdmissionDecision`])
//! and parse degradation never surfaces here.

use thiserror::Error;

use crate::model_runtime::{ModelKind, StatusCode};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoachError {
    #[error("invalid {field} path for {model} model")]
    InvalidPath { model: ModelKind, field: &'static str },

    #[error("failed to load {model} model: runtime returned status {code}")]
    Load { model: ModelKind, code: StatusCode },

    #[error("failed to initialize {model} runtime: {message}")]
    RuntimeInit { model: ModelKind, message: String },

    #[error("warm-up of {model} model failed: {message}")]
    WarmUp { model: ModelKind, message: String },

    #[error("{model} runtime is still running an abandoned analysis")]
    RuntimeBusy { model: ModelKind },

    #[error("{model} model is not ready")]
    NotReady { model: ModelKind },

    #[error("analysis #{sequence} failed: {message}")]
    Generation { sequence: u64, message: String },

    #[error("analysis #{sequence} was cancelled")]
    Cancelled { sequence: u64 },

    #[error("analysis #{sequence} timed out after {elapsed_ms}ms")]
    Timeout { sequence: u64, elapsed_ms: u64 },

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("inference worker is not running")]
    WorkerUnavailable,
}

impl CoachError {
    /// Sequence number of the analysis this error belongs to, if any.
    pub fn sequence(&self) -> Option<u64> {
        match self {
            CoachError::Generation { sequence, .. }
            | CoachError::Cancelled { sequence }
            | CoachError::Timeout { sequence, .. } => Some(*sequence),
            _ => None,
        }
    }

    /// Whether the error came out of model loading rather than an analysis.
    pub fn is_load_error(&self) -> bool {
        matches!(
            self,
            CoachError::InvalidPath { .. }
                | CoachError::Load { .. }
                | CoachError::RuntimeInit { .. }
                | CoachError::WarmUp { .. }
                | CoachError::RuntimeBusy { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_surfaces_status_code_verbatim() {
        let err = CoachError::Load { model: ModelKind::Vision, code: -17 };
        assert_eq!(err.to_string(), "failed to load vision model: runtime returned status -17");
        assert!(err.is_load_error());
        assert_eq!(err.sequence(), None);
    }

    #[test]
    fn test_generation_error_keeps_original_message() {
        let err = CoachError::Generation { sequence: 4, message: "kv cache overflow".into() };
        assert!(err.to_string().contains("kv cache overflow"));
        assert_eq!(err.sequence(), Some(4));
        assert!(!err.is_load_error());
    }

    #[test]
    fn test_busy_runtime_is_a_load_error() {
        let err = CoachError::RuntimeBusy { model: ModelKind::Vision };
        assert!(err.is_load_error());
        assert_eq!(err.sequence(), None);
        assert!(err.to_string().starts_with("vision runtime"));
    }
}
