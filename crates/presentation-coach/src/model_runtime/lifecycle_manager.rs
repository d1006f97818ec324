//! Model Lifecycle Manager
//!
//! Owns one slot per model handle and drives it through
//! `unloaded → loading → loaded → ready`, with `failed` reachable from any
//! step. Load requests are accepted on the caller's thread, the load itself
//! runs on the inference worker ([`ModelLifecycleManager::perform_load`]).
//!
//! Every load and unload bumps the slot's epoch. Work started under an older
//! epoch (a load that was unloaded midway, a session whose model went away)
//! notices the mismatch and throws its runtime away instead of publishing it.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::prompt_format::PRESET_PROMPT;
use super::runtime_trait::*;
use crate::error::CoachError;
use crate::events::CallbackDispatcher;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ModelState {
    Unloaded,
    Loading,
    Loaded,
    Ready,
    Failed(String),
}

impl ModelState {
    pub fn name(&self) -> &'static str {
        match self {
            ModelState::Unloaded => "unloaded",
            ModelState::Loading => "loading",
            ModelState::Loaded => "loaded",
            ModelState::Ready => "ready",
            ModelState::Failed(_) => "failed",
        }
    }

    /// No load is in progress.
    pub fn is_settled(&self) -> bool {
        !matches!(self, ModelState::Loading | ModelState::Loaded)
    }
}

/// What a call to [`ModelLifecycleManager::request_load`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// A new load was scheduled; hand `epoch` to `perform_load`.
    Started { epoch: u64 },
    AlreadyInProgress,
    AlreadyReady,
}

/// Runtime borrowed by an inference session.
pub struct RuntimeLease {
    pub runtime: Box<dyn InferenceRuntime>,
    pub stopper: Arc<dyn RuntimeStop>,
    pub epoch: u64,
}

struct HandleSlot {
    state: ModelState,
    epoch: u64,
    paths: Option<ModelPaths>,
    runtime: Option<Box<dyn InferenceRuntime>>,
    stopper: Option<Arc<dyn RuntimeStop>>,
    checked_out: bool,
    /// A lent runtime ignored `stop()` and is still generating.
    abandoned: bool,
    state_tx: watch::Sender<ModelState>,
}

impl HandleSlot {
    fn new() -> Self {
        let (state_tx, _) = watch::channel(ModelState::Unloaded);
        Self {
            state: ModelState::Unloaded,
            epoch: 0,
            paths: None,
            runtime: None,
            stopper: None,
            checked_out: false,
            abandoned: false,
            state_tx,
        }
    }
}

pub struct ModelLifecycleManager {
    slots: DashMap<ModelKind, Arc<Mutex<HandleSlot>>>,
    factory: Arc<dyn RuntimeFactory>,
    dispatcher: CallbackDispatcher,
    temperature: f32,
}

impl ModelLifecycleManager {
    pub fn new(factory: Arc<dyn RuntimeFactory>, dispatcher: CallbackDispatcher, temperature: f32) -> Self {
        Self {
            slots: DashMap::new(),
            factory,
            dispatcher,
            temperature,
        }
    }

    fn slot(&self, kind: ModelKind) -> Arc<Mutex<HandleSlot>> {
        // Fast path: existing slot
        if let Some(slot) = self.slots.get(&kind) {
            return slot.clone();
        }
        self.slots
            .entry(kind)
            .or_insert_with(|| Arc::new(Mutex::new(HandleSlot::new())))
            .clone()
    }

    fn transition(&self, kind: ModelKind, slot: &mut HandleSlot, state: ModelState) {
        match &state {
            ModelState::Failed(reason) => error!("{} model -> failed: {}", kind, reason),
            other => info!("{} model -> {}", kind, other.name()),
        }
        slot.state = state.clone();
        slot.state_tx.send_replace(state.clone());
        self.dispatcher.lifecycle(kind, state);
    }

    /// Accepts a load request. Idempotent: while a load is in flight or the
    /// handle is ready, the current state is re-emitted and nothing else happens.
    pub fn request_load(&self, kind: ModelKind, paths: ModelPaths) -> Result<LoadStatus, CoachError> {
        paths.validate(kind)?;

        let slot = self.slot(kind);
        let mut guard = slot.lock();
        match guard.state {
            ModelState::Loading | ModelState::Loaded => {
                debug!("{} load already in progress", kind);
                self.dispatcher.lifecycle(kind, guard.state.clone());
                Ok(LoadStatus::AlreadyInProgress)
            }
            ModelState::Ready => {
                debug!("{} model already ready", kind);
                self.dispatcher.lifecycle(kind, guard.state.clone());
                Ok(LoadStatus::AlreadyReady)
            }
            ModelState::Unloaded | ModelState::Failed(_) if guard.abandoned => {
                warn!("{} runtime from a timed-out analysis is still running, refusing reload", kind);
                Err(CoachError::RuntimeBusy { model: kind })
            }
            ModelState::Unloaded | ModelState::Failed(_) => {
                guard.epoch += 1;
                guard.paths = Some(paths);
                let epoch = guard.epoch;
                self.transition(kind, &mut guard, ModelState::Loading);
                Ok(LoadStatus::Started { epoch })
            }
        }
    }

    /// Builds, loads and (for vision) warms up a runtime. Blocking; runs on the
    /// inference worker only. Failures are recorded in the slot and emitted once.
    pub fn perform_load(&self, kind: ModelKind, epoch: u64) -> Result<(), CoachError> {
        let slot = self.slot(kind);
        let paths = {
            let guard = slot.lock();
            if guard.epoch != epoch || guard.state != ModelState::Loading {
                debug!("{} load for epoch {} superseded", kind, epoch);
                return Ok(());
            }
            match guard.paths.clone() {
                Some(paths) => paths,
                None => return Err(CoachError::InvalidPath { model: kind, field: "model" }),
            }
        };

        info!("Loading {} model: {}", kind, paths.model.display());
        info!("Using tokenizer: {}", paths.tokenizer.display());

        let config = RuntimeConfig { kind, temperature: self.temperature };
        let mut runtime = match self.factory.create(&config) {
            Ok(runtime) => runtime,
            Err(e) => {
                return self.fail(kind, epoch, CoachError::RuntimeInit { model: kind, message: e.to_string() });
            }
        };

        let code = runtime.load(&paths);
        if code != STATUS_OK {
            return self.fail(kind, epoch, CoachError::Load { model: kind, code });
        }

        {
            let mut guard = slot.lock();
            if guard.epoch != epoch {
                debug!("{} unloaded while loading, discarding runtime", kind);
                return Ok(());
            }
            self.transition(kind, &mut guard, ModelState::Loaded);
        }

        if kind.requires_warm_up() {
            debug!("Warming up {} model with preset prompt", kind);
            if let Err(e) = runtime.prefill_prompt(PRESET_PROMPT) {
                return self.fail(kind, epoch, CoachError::WarmUp { model: kind, message: e.to_string() });
            }
        }

        let mut guard = slot.lock();
        if guard.epoch != epoch {
            debug!("{} unloaded during warm-up, discarding runtime", kind);
            return Ok(());
        }
        guard.stopper = Some(runtime.stop_handle());
        guard.runtime = Some(runtime);
        self.transition(kind, &mut guard, ModelState::Ready);
        info!("✅ {} model ready ({} runtime)", kind, guard.runtime.as_ref().map(|r| r.name()).unwrap_or("?"));
        Ok(())
    }

    fn fail(&self, kind: ModelKind, epoch: u64, err: CoachError) -> Result<(), CoachError> {
        let slot = self.slot(kind);
        let mut guard = slot.lock();
        if guard.epoch == epoch {
            self.transition(kind, &mut guard, ModelState::Failed(err.to_string()));
            self.dispatcher.error(err.clone());
        }
        Err(err)
    }

    pub fn is_ready(&self, kind: ModelKind) -> bool {
        self.slots
            .get(&kind)
            .map(|slot| slot.lock().state == ModelState::Ready)
            .unwrap_or(false)
    }

    pub fn state(&self, kind: ModelKind) -> ModelState {
        self.slots
            .get(&kind)
            .map(|slot| slot.lock().state.clone())
            .unwrap_or(ModelState::Unloaded)
    }

    /// Paths of the most recent accepted load request.
    pub fn paths(&self, kind: ModelKind) -> Option<ModelPaths> {
        self.slots.get(&kind).and_then(|slot| slot.lock().paths.clone())
    }

    pub fn subscribe(&self, kind: ModelKind) -> watch::Receiver<ModelState> {
        self.slot(kind).lock().state_tx.subscribe()
    }

    /// Waits until no load is in flight and returns the resulting state.
    pub async fn wait_settled(&self, kind: ModelKind) -> ModelState {
        let mut rx = self.subscribe(kind);
        let settled = rx.wait_for(ModelState::is_settled).await.map(|state| state.clone());
        settled.unwrap_or_else(|_| self.state(kind))
    }

    /// Idempotent; valid from any state and always ends `unloaded`. A runtime
    /// lent to a running session is asked to stop generating.
    pub fn unload(&self, kind: ModelKind) {
        let Some(slot) = self.slots.get(&kind).map(|s| s.clone()) else {
            return;
        };
        let (runtime, stopper, in_session) = {
            let mut guard = slot.lock();
            guard.epoch += 1;
            let runtime = guard.runtime.take();
            let stopper = guard.stopper.take();
            let in_session = guard.checked_out;
            if guard.state != ModelState::Unloaded {
                self.transition(kind, &mut guard, ModelState::Unloaded);
            }
            (runtime, stopper, in_session)
        };

        if let Some(stopper) = stopper {
            if in_session {
                warn!("Unloading {} model during an analysis, stopping generation", kind);
            }
            stopper.stop();
        }
        drop(runtime);
    }

    pub fn unload_all(&self) {
        for kind in ModelKind::ALL {
            self.unload(kind);
        }
    }

    /// Lends the runtime to a session. Only a `ready` handle can lend.
    pub fn checkout(&self, kind: ModelKind) -> Result<RuntimeLease, CoachError> {
        let slot = self.slot(kind);
        let mut guard = slot.lock();
        if guard.state != ModelState::Ready || guard.checked_out || guard.stopper.is_none() {
            return Err(CoachError::NotReady { model: kind });
        }
        let (Some(runtime), Some(stopper)) = (guard.runtime.take(), guard.stopper.clone()) else {
            return Err(CoachError::NotReady { model: kind });
        };
        guard.checked_out = true;
        Ok(RuntimeLease { runtime, stopper, epoch: guard.epoch })
    }

    /// Takes a lent runtime back. Returns `false` (and drops the runtime) if the
    /// handle was unloaded or reloaded in the meantime.
    pub fn checkin(&self, kind: ModelKind, epoch: u64, runtime: Box<dyn InferenceRuntime>) -> bool {
        let slot = self.slot(kind);
        let mut guard = slot.lock();
        guard.checked_out = false;
        if guard.epoch == epoch && guard.state == ModelState::Ready {
            guard.runtime = Some(runtime);
            true
        } else {
            debug!("{} runtime returned after unload, dropping it", kind);
            false
        }
    }

    /// A lent runtime is gone (panicked, or its load was never queued). The
    /// handle has to be reloaded.
    pub fn mark_lost(&self, kind: ModelKind, epoch: u64, reason: &str) {
        let slot = self.slot(kind);
        let mut guard = slot.lock();
        guard.checked_out = false;
        if guard.epoch == epoch {
            guard.stopper = None;
            self.transition(kind, &mut guard, ModelState::Failed(reason.to_string()));
        }
    }

    /// A lent runtime ignored `stop()` and is still running on the blocking
    /// pool. The handle fails and refuses reloads until
    /// [`ModelLifecycleManager::release_abandoned`] is called.
    pub fn mark_unresponsive(&self, kind: ModelKind, epoch: u64, reason: &str) {
        let slot = self.slot(kind);
        let mut guard = slot.lock();
        guard.checked_out = false;
        guard.abandoned = true;
        if guard.epoch == epoch {
            guard.stopper = None;
            self.transition(kind, &mut guard, ModelState::Failed(reason.to_string()));
        }
    }

    /// The abandoned runtime finally returned (or panicked). It is dropped
    /// before the handle accepts loads again.
    pub fn release_abandoned(&self, kind: ModelKind, runtime: Option<Box<dyn InferenceRuntime>>) {
        drop(runtime);
        let slot = self.slot(kind);
        let mut guard = slot.lock();
        if guard.abandoned {
            info!("Abandoned {} runtime returned, reload possible", kind);
            guard.abandoned = false;
        }
    }

    #[cfg(test)]
    pub(crate) fn has_abandoned_runtime(&self, kind: ModelKind) -> bool {
        self.slots
            .get(&kind)
            .map(|slot| slot.lock().abandoned)
            .unwrap_or(false)
    }
}
