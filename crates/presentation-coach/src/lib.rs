// presentation-coach/crates/presentation-coach/src/lib.rs

pub mod admission;
pub mod coach;
pub mod config;
pub mod error;
pub mod events;
pub mod model_runtime;
pub mod response_parser;
pub mod shared_state;
pub mod telemetry;
pub mod worker_threads;

// Public API exports
pub use admission::{AdmissionConfig, AdmissionDecision, AnalysisRequest, FrameAdmissionController};
pub use coach::PresentationCoach;
pub use config::Config;
pub use error::CoachError;
pub use events::{CallbackDispatcher, CoachEvent, CoachListener, EventStream};
pub use model_runtime::{
    ImageFrame, InferenceRuntime, LoadStatus, ModelKind, ModelLifecycleManager, ModelPaths, ModelState,
    RuntimeFactory, RuntimeStop,
};
pub use response_parser::{AnalysisResult, Category, CategoryGrades, Grade, ResponseParser};
pub use shared_state::CoachStats;
pub use worker_threads::{InferenceSession, SessionConfig, SessionState};
