//! Presentation coach facade
//!
//! Wires the lifecycle manager, admission controller and inference worker
//! together behind the handful of calls a capture layer needs.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::admission::{AdmissionDecision, FrameAdmissionController};
use crate::config::Config;
use crate::error::CoachError;
use crate::events::CallbackDispatcher;
use crate::model_runtime::{ImageFrame, LoadStatus, ModelKind, ModelLifecycleManager, ModelPaths, ModelState, RuntimeFactory};
use crate::shared_state::{AtomicCounters, CoachStats};
use crate::worker_threads::{InferenceSession, InferenceWorker, SessionState, WorkerCommand};

pub struct PresentationCoach {
    config: Config,
    models: Arc<ModelLifecycleManager>,
    admission: Arc<FrameAdmissionController>,
    counters: Arc<AtomicCounters>,
    dispatcher: CallbackDispatcher,
    session: Arc<InferenceSession>,
    worker: Mutex<Option<InferenceWorker>>,
}

impl PresentationCoach {
    /// Builds every component and spawns the inference worker. Events are
    /// delivered through `dispatcher`.
    pub fn start(config: Config, factory: Arc<dyn RuntimeFactory>, dispatcher: CallbackDispatcher) -> anyhow::Result<Self> {
        info!("Starting presentation coach");

        let models = Arc::new(ModelLifecycleManager::new(factory, dispatcher.clone(), config.temperature));
        let admission = Arc::new(FrameAdmissionController::new(models.clone(), config.admission_config()));
        let counters = Arc::new(AtomicCounters::new());
        let session = Arc::new(InferenceSession::new(models.clone(), admission.clone(), config.session_config()));
        let worker = InferenceWorker::spawn(session.clone(), models.clone(), dispatcher.clone(), counters.clone())?;

        Ok(Self {
            config,
            models,
            admission,
            counters,
            dispatcher,
            session,
            worker: Mutex::new(Some(worker)),
        })
    }

    fn submit(&self, command: WorkerCommand) -> Result<(), CoachError> {
        match self.worker.lock().as_ref() {
            Some(worker) => worker.submit(command),
            None => Err(CoachError::WorkerUnavailable),
        }
    }

    /// Requests a load of `kind`. Returns immediately; progress arrives as
    /// lifecycle events.
    pub fn request_load(&self, kind: ModelKind, paths: ModelPaths) -> Result<LoadStatus, CoachError> {
        let status = self.models.request_load(kind, paths)?;
        if let LoadStatus::Started { epoch } = status {
            if let Err(e) = self.submit(WorkerCommand::Load { kind, epoch }) {
                self.models.mark_lost(kind, epoch, &e.to_string());
                return Err(e);
            }
        }
        Ok(status)
    }

    /// Requests a load of every model that has paths in the config.
    pub fn load_from_config(&self) -> Vec<(ModelKind, Result<LoadStatus, CoachError>)> {
        ModelKind::ALL
            .into_iter()
            .filter_map(|kind| match self.config.model_paths(kind) {
                Some(paths) => Some((kind, self.request_load(kind, paths))),
                None => {
                    debug!("No {} model configured, skipping", kind);
                    None
                }
            })
            .collect()
    }

    /// Offers a captured frame. Returns the analysis sequence number when the
    /// frame was admitted; rejected frames are simply dropped.
    pub fn offer_frame(&self, frame: ImageFrame) -> Option<u64> {
        self.offer_frame_at(frame, Instant::now())
    }

    pub fn offer_frame_at(&self, frame: ImageFrame, now: Instant) -> Option<u64> {
        let decision = self.admission.offer_at(frame, now);
        self.counters.record_decision(&decision);
        let AdmissionDecision::Admitted(request) = decision else {
            return None;
        };

        let sequence = request.sequence();
        debug!("Frame admitted as analysis #{}", sequence);
        if let Err(e) = self.submit(WorkerCommand::Analyze(request)) {
            warn!("Analysis #{} dropped: {}", sequence, e);
            self.admission.complete(sequence);
            self.counters.inc_sessions_failed();
            self.dispatcher.error(e);
            return None;
        }
        Some(sequence)
    }

    pub fn is_ready(&self, kind: ModelKind) -> bool {
        self.models.is_ready(kind)
    }

    pub fn state(&self, kind: ModelKind) -> ModelState {
        self.models.state(kind)
    }

    pub async fn wait_settled(&self, kind: ModelKind) -> ModelState {
        self.models.wait_settled(kind).await
    }

    pub fn unload(&self, kind: ModelKind) {
        self.models.unload(kind);
    }

    /// Sequence and state of the most recent analysis.
    pub fn session_state(&self) -> Option<(u64, SessionState)> {
        self.session.last_session()
    }

    pub fn stats(&self) -> CoachStats {
        self.counters.snapshot()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn models(&self) -> &Arc<ModelLifecycleManager> {
        &self.models
    }

    /// Unloads every model and stops the worker. Idempotent.
    pub fn shutdown(&self) {
        let worker = self.worker.lock().take();
        let Some(mut worker) = worker else {
            return;
        };
        info!("Shutting down presentation coach");
        self.models.unload_all();
        worker.shutdown();
        info!("Presentation coach shutdown complete");
    }
}

impl Drop for PresentationCoach {
    fn drop(&mut self) {
        self.shutdown();
    }
}
