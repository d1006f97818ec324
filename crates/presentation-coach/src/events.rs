//! Callback dispatcher
//!
//! Every lifecycle change, analysis result and error travels through one
//! unbounded FIFO channel, so the caller observes them exactly once and in the
//! order they were produced. Delivery happens either on the caller's own task
//! ([`EventStream::recv`]) or on a dedicated notifier thread that invokes a
//! [`CoachListener`].

use serde_json::json;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::CoachError;
use crate::model_runtime::{ModelKind, ModelState};
use crate::response_parser::AnalysisResult;

#[derive(Debug, Clone, PartialEq)]
pub enum CoachEvent {
    Lifecycle { model: ModelKind, state: ModelState },
    Result(AnalysisResult),
    Error(CoachError),
}

/// Caller-side event contract.
pub trait CoachListener: Send + Sync + 'static {
    fn on_lifecycle(&self, model: ModelKind, state: &ModelState);
    fn on_result(&self, result: &AnalysisResult);
    fn on_error(&self, error: &CoachError);
}

impl CoachEvent {
    /// One JSON object per event, tagged by `event`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            CoachEvent::Lifecycle { model, state } => json!({ "event": "lifecycle", "model": model, "state": state }),
            CoachEvent::Result(result) => json!({ "event": "result", "result": result }),
            CoachEvent::Error(error) => json!({
                "event": "error",
                "sequence": error.sequence(),
                "message": error.to_string(),
            }),
        }
    }

    /// Hands the event to the matching listener method.
    pub fn deliver(&self, listener: &dyn CoachListener) {
        match self {
            CoachEvent::Lifecycle { model, state } => listener.on_lifecycle(*model, state),
            CoachEvent::Result(result) => listener.on_result(result),
            CoachEvent::Error(error) => listener.on_error(error),
        }
    }
}

/// Producer side, cloned into the lifecycle manager and the inference worker.
#[derive(Clone)]
pub struct CallbackDispatcher {
    sender: mpsc::UnboundedSender<CoachEvent>,
}

impl CallbackDispatcher {
    pub fn channel() -> (Self, EventStream) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, EventStream { receiver })
    }

    pub fn lifecycle(&self, model: ModelKind, state: ModelState) {
        self.emit(CoachEvent::Lifecycle { model, state });
    }

    pub fn result(&self, result: AnalysisResult) {
        self.emit(CoachEvent::Result(result));
    }

    pub fn error(&self, error: CoachError) {
        self.emit(CoachEvent::Error(error));
    }

    fn emit(&self, event: CoachEvent) {
        if let Err(mpsc::error::SendError(event)) = self.sender.send(event) {
            debug!("No event consumer attached, dropping {:?}", event);
        }
    }
}

/// Consumer side of the event channel.
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<CoachEvent>,
}

impl EventStream {
    pub async fn recv(&mut self) -> Option<CoachEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<CoachEvent> {
        self.receiver.try_recv().ok()
    }

    /// Drains the channel on a dedicated notifier thread until every
    /// dispatcher has been dropped.
    pub fn spawn_listener<L: CoachListener>(mut self, listener: L) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("coach-events".to_string())
            .spawn(move || {
                while let Some(event) = self.receiver.blocking_recv() {
                    event.deliver(&listener);
                }
                info!("Event channel closed, notifier thread exiting");
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default, Clone)]
    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl CoachListener for Recorder {
        fn on_lifecycle(&self, model: ModelKind, state: &ModelState) {
            self.seen.lock().push(format!("{}:{}", model, state.name()));
        }

        fn on_result(&self, result: &AnalysisResult) {
            self.seen.lock().push(format!("result:{}", result.sequence));
        }

        fn on_error(&self, error: &CoachError) {
            self.seen.lock().push(format!("error:{}", error));
        }
    }

    #[test]
    fn test_events_arrive_in_emission_order() {
        let (dispatcher, mut stream) = CallbackDispatcher::channel();
        dispatcher.lifecycle(ModelKind::Vision, ModelState::Loading);
        dispatcher.lifecycle(ModelKind::Vision, ModelState::Ready);
        dispatcher.error(CoachError::WorkerUnavailable);

        let first = tokio_test::block_on(stream.recv());
        assert_eq!(first, Some(CoachEvent::Lifecycle { model: ModelKind::Vision, state: ModelState::Loading }));
        assert_eq!(
            stream.try_recv(),
            Some(CoachEvent::Lifecycle { model: ModelKind::Vision, state: ModelState::Ready })
        );
        assert_eq!(stream.try_recv(), Some(CoachEvent::Error(CoachError::WorkerUnavailable)));
        assert_eq!(stream.try_recv(), None);
    }

    #[test]
    fn test_listener_thread_delivers_every_event_once() {
        let (dispatcher, stream) = CallbackDispatcher::channel();
        let recorder = Recorder::default();
        let handle = stream.spawn_listener(recorder.clone()).unwrap();

        dispatcher.lifecycle(ModelKind::Vision, ModelState::Loading);
        dispatcher.result(AnalysisResult::fallback(7));
        dispatcher.error(CoachError::Cancelled { sequence: 8 });
        drop(dispatcher);
        handle.join().unwrap();

        let seen = recorder.seen.lock().clone();
        assert_eq!(seen, vec![
            "vision:loading".to_string(),
            "result:7".to_string(),
            "error:analysis #8 was cancelled".to_string(),
        ]);
    }

    #[test]
    fn test_event_json_shape() {
        let lifecycle = CoachEvent::Lifecycle { model: ModelKind::AudioEncoder, state: ModelState::Failed("oom".into()) };
        let json = lifecycle.to_json();
        assert_eq!(json["event"], "lifecycle");
        assert_eq!(json["model"], "audio-encoder");
        assert_eq!(json["state"]["state"], "failed");
        assert_eq!(json["state"]["reason"], "oom");

        let error = CoachEvent::Error(CoachError::Timeout { sequence: 4, elapsed_ms: 30_000 }).to_json();
        assert_eq!(error["sequence"], 4);
        assert_eq!(error["message"], "analysis #4 timed out after 30000ms");

        let result = CoachEvent::Result(AnalysisResult::fallback(2)).to_json();
        assert_eq!(result["result"]["sequence"], 2);
    }

    #[test]
    fn test_emit_without_consumer_is_silent() {
        let (dispatcher, stream) = CallbackDispatcher::channel();
        drop(stream);
        dispatcher.lifecycle(ModelKind::AudioEncoder, ModelState::Unloaded);
    }
}
