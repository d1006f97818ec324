//! Inference worker thread
//!
//! A single dedicated thread drives a current-thread tokio runtime and
//! executes model loads and analysis sessions one at a time, in the order
//! they were submitted. The runtime is therefore never used re-entrantly.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::admission::AnalysisRequest;
use crate::error::CoachError;
use crate::events::CallbackDispatcher;
use crate::model_runtime::{ModelKind, ModelLifecycleManager};
use crate::shared_state::AtomicCounters;
use crate::worker_threads::inference_session::InferenceSession;

pub enum WorkerCommand {
    /// Run a load accepted by `request_load` under `epoch`.
    Load { kind: ModelKind, epoch: u64 },
    Analyze(AnalysisRequest),
    Shutdown,
}

struct WorkerContext {
    session: Arc<InferenceSession>,
    models: Arc<ModelLifecycleManager>,
    dispatcher: CallbackDispatcher,
    counters: Arc<AtomicCounters>,
}

pub struct InferenceWorker {
    sender: mpsc::UnboundedSender<WorkerCommand>,
    thread_handle: Option<JoinHandle<()>>,
}

impl InferenceWorker {
    pub fn spawn(
        session: Arc<InferenceSession>,
        models: Arc<ModelLifecycleManager>,
        dispatcher: CallbackDispatcher,
        counters: Arc<AtomicCounters>,
    ) -> anyhow::Result<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let context = WorkerContext { session, models, dispatcher, counters };

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create inference worker runtime: {}", e))?;

        let thread_handle = thread::Builder::new()
            .name("coach-inference".to_string())
            .spawn(move || {
                rt.block_on(Self::run_worker_loop(receiver, context));
                // a runtime that ignored stop() may still hold a blocking thread
                rt.shutdown_background();
            })
            .map_err(|e| anyhow::anyhow!("Failed to spawn inference worker thread: {}", e))?;

        info!("Spawned inference worker thread");

        Ok(Self { sender, thread_handle: Some(thread_handle) })
    }

    pub fn submit(&self, command: WorkerCommand) -> Result<(), CoachError> {
        self.sender.send(command).map_err(|_| CoachError::WorkerUnavailable)
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    async fn run_worker_loop(mut receiver: mpsc::UnboundedReceiver<WorkerCommand>, context: WorkerContext) {
        while let Some(command) = receiver.recv().await {
            match command {
                WorkerCommand::Load { kind, epoch } => {
                    match context.models.perform_load(kind, epoch) {
                        Err(e) if e.is_load_error() => debug!("Load of {} model ended with error: {}", kind, e),
                        Err(e) => warn!("Unexpected error while loading {} model: {}", kind, e),
                        Ok(()) => {}
                    }
                }
                WorkerCommand::Analyze(request) => {
                    let sequence = request.sequence();
                    match context.session.run(request).await {
                        Ok(result) => {
                            context.counters.inc_sessions_completed();
                            debug!("Analysis #{} complete, score {:.2}", sequence, result.score);
                            context.dispatcher.result(result);
                        }
                        Err(e) => {
                            context.counters.inc_sessions_failed();
                            warn!("Analysis #{} failed: {}", sequence, e);
                            context.dispatcher.error(e);
                        }
                    }
                }
                WorkerCommand::Shutdown => break,
            }
        }

        // queued analyses never run, release their slots
        receiver.close();
        while let Ok(command) = receiver.try_recv() {
            if let WorkerCommand::Analyze(request) = command {
                context.counters.inc_sessions_failed();
                context.dispatcher.error(context.session.abandon(request));
            }
        }

        info!("Inference worker shutting down");
    }

    /// Stops the loop after the commands already queued ahead of it.
    pub fn shutdown(&mut self) {
        let _ = self.sender.send(WorkerCommand::Shutdown);
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!("Inference worker thread panicked");
            }
        }
    }
}

impl Drop for InferenceWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{AdmissionConfig, AdmissionDecision, FrameAdmissionController};
    use crate::events::{CoachEvent, EventStream};
    use crate::model_runtime::{ImageFrame, LoadStatus, ModelPaths, ModelState, Script, ScriptedRuntimeFactory};
    use crate::worker_threads::inference_session::SessionConfig;

    struct Harness {
        models: Arc<ModelLifecycleManager>,
        admission: Arc<FrameAdmissionController>,
        counters: Arc<AtomicCounters>,
        worker: InferenceWorker,
        events: EventStream,
    }

    fn harness(script: Script) -> Harness {
        let factory = Arc::new(ScriptedRuntimeFactory::new(script));
        let (dispatcher, events) = CallbackDispatcher::channel();
        let models = Arc::new(ModelLifecycleManager::new(factory, dispatcher.clone(), 0.8));
        let admission = Arc::new(FrameAdmissionController::new(models.clone(), AdmissionConfig::default()));
        let session = Arc::new(InferenceSession::new(models.clone(), admission.clone(), SessionConfig::default()));
        let counters = Arc::new(AtomicCounters::new());
        let worker = InferenceWorker::spawn(session, models.clone(), dispatcher, counters.clone()).unwrap();
        Harness { models, admission, counters, worker, events }
    }

    fn next_event(events: &mut EventStream) -> CoachEvent {
        tokio_test::block_on(async {
            tokio::time::timeout(std::time::Duration::from_secs(5), events.recv())
                .await
                .expect("timed out waiting for event")
                .expect("event channel closed")
        })
    }

    fn load_vision(h: &mut Harness) {
        let status = h
            .models
            .request_load(ModelKind::Vision, ModelPaths::new("llava.pte", "tokenizer.bin"))
            .unwrap();
        let LoadStatus::Started { epoch } = status else {
            panic!("load should start");
        };
        h.worker.submit(WorkerCommand::Load { kind: ModelKind::Vision, epoch }).unwrap();
        let mut states = Vec::new();
        while states.last() != Some(&ModelState::Ready) {
            match next_event(&mut h.events) {
                CoachEvent::Lifecycle { state, .. } => states.push(state),
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(states, vec![ModelState::Loading, ModelState::Loaded, ModelState::Ready]);
    }

    #[test]
    fn test_worker_loads_and_analyzes() {
        let mut h = harness(Script::from_response("Eye Contact: B+\nExplanation: steady"));
        load_vision(&mut h);

        let AdmissionDecision::Admitted(request) = h.admission.offer(ImageFrame::solid_rgb(2, 2, [1, 2, 3])) else {
            panic!("frame should be admitted");
        };
        h.worker.submit(WorkerCommand::Analyze(request)).unwrap();

        match next_event(&mut h.events) {
            CoachEvent::Result(result) => {
                assert_eq!(result.sequence, 1);
                assert_eq!(result.explanation, "steady");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(h.admission.in_flight(), None);
        assert_eq!(h.counters.snapshot().sessions_completed, 1);
    }

    #[test]
    fn test_failed_load_is_reported_once() {
        let mut h = harness(Script::default().with_load_status(-17));
        let LoadStatus::Started { epoch } = h
            .models
            .request_load(ModelKind::Vision, ModelPaths::new("llava.pte", "tokenizer.bin"))
            .unwrap()
        else {
            panic!("load should start");
        };
        h.worker.submit(WorkerCommand::Load { kind: ModelKind::Vision, epoch }).unwrap();

        assert!(matches!(next_event(&mut h.events), CoachEvent::Lifecycle { state: ModelState::Loading, .. }));
        assert!(matches!(next_event(&mut h.events), CoachEvent::Lifecycle { state: ModelState::Failed(_), .. }));
        assert_eq!(
            next_event(&mut h.events),
            CoachEvent::Error(CoachError::Load { model: ModelKind::Vision, code: -17 })
        );
        assert_eq!(h.events.try_recv(), None);
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let mut h = harness(Script::default());
        h.worker.shutdown();
        assert!(!h.worker.is_running());
        assert_eq!(
            h.worker.submit(WorkerCommand::Load { kind: ModelKind::Vision, epoch: 1 }),
            Err(CoachError::WorkerUnavailable)
        );
    }
}
