//! Inference Session
//!
//! Runs one admitted frame through the vision runtime: prefill the image,
//! stream a generation with the coach instruction, aggregate tokens up to the
//! stop sequence, then parse. The admission slot is released exactly once
//! whatever the outcome, including when the session future is dropped.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::admission::{AnalysisRequest, FrameAdmissionController};
use crate::error::CoachError;
use crate::model_runtime::prompt_format::{COACH_INSTRUCTION, STOP_TOKEN, VISION_SEQ_LEN};
use crate::model_runtime::{ImageFrame, InferenceRuntime, ModelKind, ModelLifecycleManager};
use crate::response_parser::{AnalysisResult, ResponseParser};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model: ModelKind,
    pub prompt: String,
    pub max_tokens: u32,
    pub stop_sequence: String,
    pub echo: bool,
    /// Upper bound on prefill plus generation.
    pub timeout: Duration,
    /// How long a stopped runtime gets to hand control back before the handle
    /// is declared lost.
    pub stop_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: ModelKind::Vision,
            prompt: COACH_INSTRUCTION.to_string(),
            max_tokens: VISION_SEQ_LEN,
            stop_sequence: STOP_TOKEN.to_string(),
            echo: false,
            timeout: Duration::from_secs(30),
            stop_grace: Duration::from_millis(2000),
        }
    }
}

/// Accumulates streamed tokens until the stop sequence shows up. The stop
/// sequence may straddle token boundaries; it and everything after it is
/// dropped.
#[derive(Debug)]
pub struct StreamAggregator {
    text: String,
    stop_sequence: String,
    tokens: u32,
    stopped: bool,
}

impl StreamAggregator {
    pub fn new(stop_sequence: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            stop_sequence: stop_sequence.into(),
            tokens: 0,
            stopped: false,
        }
    }

    pub fn push(&mut self, token: &str) {
        if self.stopped {
            return;
        }
        self.tokens += 1;
        self.text.push_str(token);
        if self.stop_sequence.is_empty() {
            return;
        }

        // only the tail can contain a stop sequence completed by this token
        let mut start = self.text.len().saturating_sub(token.len() + self.stop_sequence.len());
        while !self.text.is_char_boundary(start) {
            start -= 1;
        }
        if let Some(offset) = self.text[start..].find(&self.stop_sequence) {
            self.text.truncate(start + offset);
            self.stopped = true;
        }
    }

    pub fn saw_stop(&self) -> bool {
        self.stopped
    }

    pub fn tokens(&self) -> u32 {
        self.tokens
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// Progress of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Submitted,
    Streaming,
    Aggregating,
    Parsed,
    Failed,
}

/// Tracks the session state and releases the admission slot on every exit
/// path.
struct SessionGuard<'a> {
    admission: &'a FrameAdmissionController,
    progress: &'a Mutex<Option<(u64, SessionState)>>,
    sequence: u64,
    state: SessionState,
}

impl<'a> SessionGuard<'a> {
    fn start(session: &'a InferenceSession, sequence: u64) -> Self {
        *session.progress.lock() = Some((sequence, SessionState::Submitted));
        Self {
            admission: &session.admission,
            progress: &session.progress,
            sequence,
            state: SessionState::Submitted,
        }
    }

    fn enter(&mut self, state: SessionState) {
        debug!("Analysis #{}: {:?} -> {:?}", self.sequence, self.state, state);
        self.state = state;
        *self.progress.lock() = Some((self.sequence, state));
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if self.state != SessionState::Parsed {
            self.enter(SessionState::Failed);
        }
        self.admission.complete(self.sequence);
    }
}

type GenerationOutcome = (Box<dyn InferenceRuntime>, anyhow::Result<StreamAggregator>);

pub struct InferenceSession {
    models: Arc<ModelLifecycleManager>,
    admission: Arc<FrameAdmissionController>,
    config: SessionConfig,
    progress: Mutex<Option<(u64, SessionState)>>,
}

impl InferenceSession {
    pub fn new(
        models: Arc<ModelLifecycleManager>,
        admission: Arc<FrameAdmissionController>,
        config: SessionConfig,
    ) -> Self {
        Self { models, admission, config, progress: Mutex::new(None) }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Sequence and state of the most recent session, `None` before the first.
    pub fn last_session(&self) -> Option<(u64, SessionState)> {
        *self.progress.lock()
    }

    pub async fn run(&self, request: AnalysisRequest) -> Result<AnalysisResult, CoachError> {
        let sequence = request.sequence();
        let mut guard = SessionGuard::start(self, sequence);
        let kind = self.config.model;
        let queued = request.admitted_at().elapsed();
        debug!("Analysis #{} starting ({}ms after admission)", sequence, queued.as_millis());

        let lease = match self.models.checkout(kind) {
            Ok(lease) => lease,
            Err(e) => {
                debug!("Analysis #{} has no runtime: {}", sequence, e);
                return Err(CoachError::Cancelled { sequence });
            }
        };
        let epoch = lease.epoch;
        let stopper = lease.stopper.clone();

        let frame = request.into_frame();
        let prompt = self.config.prompt.clone();
        let stop_sequence = self.config.stop_sequence.clone();
        let max_tokens = self.config.max_tokens;
        let echo = self.config.echo;
        let mut runtime = lease.runtime;

        let started = Instant::now();
        guard.enter(SessionState::Streaming);
        let mut task = tokio::task::spawn_blocking(move || -> GenerationOutcome {
            let outcome = generate(runtime.as_mut(), &frame, &prompt, max_tokens, echo, stop_sequence);
            (runtime, outcome)
        });

        let finished = tokio::time::timeout(self.config.timeout, &mut task).await;
        let joined = match finished {
            Ok(joined) => joined,
            Err(_) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                warn!("Analysis #{} exceeded {:?}, stopping generation", sequence, self.config.timeout);
                stopper.stop();
                let stopped = tokio::time::timeout(self.config.stop_grace, &mut task).await;
                match stopped {
                    Ok(Ok((runtime, _))) => {
                        self.models.checkin(kind, epoch, runtime);
                    }
                    Ok(Err(e)) => {
                        self.models.mark_lost(kind, epoch, &format!("runtime panicked: {}", e));
                    }
                    Err(_) => {
                        error!("{} runtime ignored stop for {:?}", kind, self.config.stop_grace);
                        self.models.mark_unresponsive(kind, epoch, "runtime did not stop after session timeout");
                        let models = self.models.clone();
                        tokio::spawn(async move {
                            let runtime = task.await.ok().map(|(runtime, _)| runtime);
                            models.release_abandoned(kind, runtime);
                        });
                    }
                }
                return Err(CoachError::Timeout { sequence, elapsed_ms });
            }
        };

        let (runtime, outcome) = match joined {
            Ok(parts) => parts,
            Err(e) => {
                self.models.mark_lost(kind, epoch, &format!("runtime panicked: {}", e));
                return Err(CoachError::Generation { sequence, message: e.to_string() });
            }
        };

        guard.enter(SessionState::Aggregating);
        if !self.models.checkin(kind, epoch, runtime) {
            info!("Analysis #{} cancelled, {} model was unloaded", sequence, kind);
            return Err(CoachError::Cancelled { sequence });
        }

        let aggregator = outcome.map_err(|e| CoachError::Generation { sequence, message: e.to_string() })?;

        let truncated = !aggregator.saw_stop() && aggregator.tokens() >= max_tokens;
        if truncated {
            warn!("Analysis #{} hit the {}-token budget without a stop sequence", sequence, max_tokens);
        }
        debug!(
            "Analysis #{} generated {} tokens in {}ms",
            sequence,
            aggregator.tokens(),
            started.elapsed().as_millis()
        );

        let result = ResponseParser::parse(aggregator.text()).for_request(sequence, truncated);
        guard.enter(SessionState::Parsed);
        Ok(result)
    }

    /// Settles a request that will never run.
    pub fn abandon(&self, request: AnalysisRequest) -> CoachError {
        let sequence = request.sequence();
        self.admission.complete(sequence);
        CoachError::Cancelled { sequence }
    }
}

fn generate(
    runtime: &mut dyn InferenceRuntime,
    frame: &ImageFrame,
    prompt: &str,
    max_tokens: u32,
    echo: bool,
    stop_sequence: String,
) -> anyhow::Result<StreamAggregator> {
    runtime.prefill_image(frame)?;
    let mut aggregator = StreamAggregator::new(stop_sequence);
    runtime.generate(prompt, max_tokens, echo, &mut |token: &str| aggregator.push(token))?;
    Ok(aggregator)
}
