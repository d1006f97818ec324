//! Scripted Runtime Adapter
//!
//! Deterministic runtime that replays a canned token stream. Drives the demo
//! binary when no device runtime is linked, and the lifecycle and session tests.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::prompt_format::STOP_TOKEN;
use super::runtime_trait::*;

/// Behaviour of every runtime built by a [`ScriptedRuntimeFactory`].
#[derive(Debug, Clone)]
pub struct Script {
    pub load_status: StatusCode,
    pub tokens: Vec<String>,
    pub token_delay: Duration,
    pub fail_warm_up: Option<String>,
    pub fail_prefill: Option<String>,
    pub fail_generate: Option<String>,
    /// Keep streaming after `stop()`, like a wedged device runtime.
    pub ignore_stop: bool,
}

impl Script {
    /// Tokenizes `response` at word boundaries and appends the stop token.
    pub fn from_response(response: &str) -> Self {
        let mut tokens: Vec<String> = response
            .split_inclusive(|c: char| c == ' ' || c == '\n')
            .map(str::to_string)
            .collect();
        tokens.push(STOP_TOKEN.to_string());
        Self { tokens, ..Self::default() }
    }

    pub fn with_load_status(mut self, status: StatusCode) -> Self {
        self.load_status = status;
        self
    }

    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    pub fn failing_generate(mut self, message: impl Into<String>) -> Self {
        self.fail_generate = Some(message.into());
        self
    }

    pub fn failing_prefill(mut self, message: impl Into<String>) -> Self {
        self.fail_prefill = Some(message.into());
        self
    }

    pub fn failing_warm_up(mut self, message: impl Into<String>) -> Self {
        self.fail_warm_up = Some(message.into());
        self
    }

    pub fn ignoring_stop(mut self) -> Self {
        self.ignore_stop = true;
        self
    }
}

impl Default for Script {
    fn default() -> Self {
        Self {
            load_status: STATUS_OK,
            tokens: vec![STOP_TOKEN.to_string()],
            token_delay: Duration::ZERO,
            fail_warm_up: None,
            fail_prefill: None,
            fail_generate: None,
            ignore_stop: false,
        }
    }
}

/// Call counters shared by a factory and every runtime it creates.
#[derive(Debug, Default)]
pub struct RuntimeCalls {
    pub created: AtomicUsize,
    pub loads: AtomicUsize,
    pub warm_ups: AtomicUsize,
    pub image_prefills: AtomicUsize,
    pub generations: AtomicUsize,
    pub stops: AtomicUsize,
}

impl RuntimeCalls {
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn generations(&self) -> usize {
        self.generations.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

struct StopFlag {
    stopped: AtomicBool,
    calls: Arc<RuntimeCalls>,
}

impl RuntimeStop for StopFlag {
    fn stop(&self) {
        self.calls.stops.fetch_add(1, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
    }
}

pub struct ScriptedRuntime {
    kind: ModelKind,
    script: Script,
    loaded: bool,
    stop: Arc<StopFlag>,
    calls: Arc<RuntimeCalls>,
}

impl ScriptedRuntime {
    pub fn new(kind: ModelKind, script: Script, calls: Arc<RuntimeCalls>) -> Self {
        let stop = Arc::new(StopFlag { stopped: AtomicBool::new(false), calls: calls.clone() });
        Self { kind, script, loaded: false, stop, calls }
    }

    fn ensure_loaded(&self) -> anyhow::Result<()> {
        if !self.loaded {
            return Err(anyhow::anyhow!("{} runtime used before load", self.kind));
        }
        Ok(())
    }
}

impl InferenceRuntime for ScriptedRuntime {
    fn name(&self) -> &str {
        "scripted"
    }

    fn load(&mut self, paths: &ModelPaths) -> StatusCode {
        self.calls.loads.fetch_add(1, Ordering::SeqCst);
        debug!("Scripted {} runtime loading {}", self.kind, paths.model.display());
        self.loaded = self.script.load_status == STATUS_OK;
        self.script.load_status
    }

    fn prefill_prompt(&mut self, _prompt: &str) -> anyhow::Result<()> {
        self.ensure_loaded()?;
        self.calls.warm_ups.fetch_add(1, Ordering::SeqCst);
        match &self.script.fail_warm_up {
            Some(message) => Err(anyhow::anyhow!(message.clone())),
            None => Ok(()),
        }
    }

    fn prefill_image(&mut self, _frame: &ImageFrame) -> anyhow::Result<()> {
        self.ensure_loaded()?;
        self.calls.image_prefills.fetch_add(1, Ordering::SeqCst);
        // a new image starts a new turn
        self.stop.stopped.store(false, Ordering::SeqCst);
        match &self.script.fail_prefill {
            Some(message) => Err(anyhow::anyhow!(message.clone())),
            None => Ok(()),
        }
    }

    fn generate(
        &mut self,
        _prompt: &str,
        max_tokens: u32,
        _echo: bool,
        on_token: &mut dyn FnMut(&str),
    ) -> anyhow::Result<()> {
        self.ensure_loaded()?;
        self.calls.generations.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = &self.script.fail_generate {
            return Err(anyhow::anyhow!(message.clone()));
        }

        for token in self.script.tokens.iter().take(max_tokens as usize) {
            if !self.script.token_delay.is_zero() {
                std::thread::sleep(self.script.token_delay);
            }
            if self.stop.stopped.load(Ordering::SeqCst) && !self.script.ignore_stop {
                debug!("Scripted {} runtime stopped mid-stream", self.kind);
                break;
            }
            on_token(token);
        }
        Ok(())
    }

    fn stop_handle(&self) -> Arc<dyn RuntimeStop> {
        self.stop.clone()
    }
}

/// Creates [`ScriptedRuntime`]s. The script can be swapped between loads.
pub struct ScriptedRuntimeFactory {
    script: Mutex<Script>,
    create_error: Mutex<Option<String>>,
    calls: Arc<RuntimeCalls>,
}

impl ScriptedRuntimeFactory {
    pub fn new(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            create_error: Mutex::new(None),
            calls: Arc::new(RuntimeCalls::default()),
        }
    }

    pub fn set_script(&self, script: Script) {
        *self.script.lock() = script;
    }

    /// Makes the next `create` calls fail, as a runtime that cannot allocate would.
    pub fn fail_create(&self, message: Option<String>) {
        *self.create_error.lock() = message;
    }

    pub fn calls(&self) -> Arc<RuntimeCalls> {
        self.calls.clone()
    }
}

impl RuntimeFactory for ScriptedRuntimeFactory {
    fn create(&self, config: &RuntimeConfig) -> anyhow::Result<Box<dyn InferenceRuntime>> {
        if let Some(message) = self.create_error.lock().clone() {
            return Err(anyhow::anyhow!(message));
        }
        self.calls.created.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().clone();
        Ok(Box::new(ScriptedRuntime::new(config.kind, script, self.calls.clone())))
    }
}
