pub mod inference_session;
pub mod inference_worker;
pub use inference_session::{InferenceSession, SessionConfig, SessionState, StreamAggregator};
pub use inference_worker::{InferenceWorker, WorkerCommand};
