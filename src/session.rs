use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::conversation::{ConversationLog, EntryKind, Transcript, Turn};
use crate::llm::{
    GenerationParams, InferenceProvider, LoadOptions, LoadProgress, LoadStatus, ModelHandle,
    ProgressSender, ProviderError,
};
use crate::prompts::{build_prompt, extract_reply};

/// Shown in place of a reply when generation fails.
pub const APOLOGY: &str = "Sorry, I couldn't generate a response. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No model loaded and no load in flight
    Idle,
    LoadingModel,
    ModelReady,
    Generating,
}

impl SessionState {
    pub fn model_ready(self) -> bool {
        matches!(self, SessionState::ModelReady | SessionState::Generating)
    }

    pub fn is_generating(self) -> bool {
        self == SessionState::Generating
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    LoadRequested,
    LoadSucceeded,
    LoadFailed,
    SendRequested,
    GenerationFinished,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("model load already in progress")]
    LoadInProgress,
    #[error("model already loaded")]
    AlreadyLoaded,
    #[error("model not loaded yet")]
    ModelNotReady,
    #[error("a response is already being generated")]
    Busy,
    #[error("invalid transition: {event:?} in {state:?}")]
    Invalid {
        state: SessionState,
        event: SessionEvent,
    },
}

/// Pure transition function. At most one load and one generation can be in
/// flight, and sending requires a loaded model.
pub fn transition(
    state: SessionState,
    event: SessionEvent,
) -> Result<SessionState, TransitionError> {
    use SessionEvent as E;
    use SessionState as S;

    match (state, event) {
        (S::Idle, E::LoadRequested) => Ok(S::LoadingModel),
        (S::LoadingModel, E::LoadRequested) => Err(TransitionError::LoadInProgress),
        (S::ModelReady | S::Generating, E::LoadRequested) => Err(TransitionError::AlreadyLoaded),

        (S::LoadingModel, E::LoadSucceeded) => Ok(S::ModelReady),
        (S::LoadingModel, E::LoadFailed) => Ok(S::Idle),

        (S::ModelReady, E::SendRequested) => Ok(S::Generating),
        (S::Generating, E::SendRequested) => Err(TransitionError::Busy),
        (S::Idle | S::LoadingModel, E::SendRequested) => Err(TransitionError::ModelNotReady),

        (S::Generating, E::GenerationFinished) => Ok(S::ModelReady),

        (state, event) => Err(TransitionError::Invalid { state, event }),
    }
}

/// Failures caught at the controller boundary. They end up in the transcript
/// and the log file, never in the caller.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("failed to load model: {0}")]
    LoadFailure(#[source] ProviderError),
    #[error("failed to generate a response: {0}")]
    GenerationFailure(#[source] ProviderError),
}

/// Enabled/visible state of the interactive controls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controls {
    pub input_enabled: bool,
    pub send_enabled: bool,
    pub load_enabled: bool,
    pub load_visible: bool,
    pub load_label: &'static str,
}

/// Bounded control for `max_new_tokens`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSlider {
    value: u32,
    min: u32,
    max: u32,
    step: u32,
}

impl TokenSlider {
    /// `min` is raised to 1 and `max` to `min` if needed.
    pub fn new(value: u32, min: u32, max: u32, step: u32) -> Self {
        let min = min.max(1);
        let max = max.max(min);
        Self {
            value: value.clamp(min, max),
            min,
            max,
            step: step.max(1),
        }
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn min(&self) -> u32 {
        self.min
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn set(&mut self, value: u32) -> u32 {
        self.value = value.clamp(self.min, self.max);
        self.value
    }

    /// Move by `steps` increments, negative to go down.
    pub fn step_by(&mut self, steps: i32) -> u32 {
        let delta = i64::from(self.step) * i64::from(steps);
        let target = (i64::from(self.value) + delta).clamp(i64::from(self.min), i64::from(self.max));
        self.set(target as u32)
    }

    /// Position within the range, for gauges.
    pub fn ratio(&self) -> f64 {
        if self.max == self.min {
            return 1.0;
        }
        f64::from(self.value - self.min) / f64::from(self.max - self.min)
    }
}

/// Result of a load request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Rejected by the gate; nothing changed
    Ignored,
    Ready,
    Failed,
}

/// Result of a send request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Rejected by the gate; nothing changed
    Ignored,
    Replied(String),
    /// The apology was shown instead of a reply
    Failed,
}

tokio::task_local! {
    static PROVIDER_CALL: ();
}

/// True while running inside a guarded provider call, where a panic is
/// caught and reported as a failed job.
pub fn in_provider_call() -> bool {
    PROVIDER_CALL.try_with(|_| ()).is_ok()
}

/// Run a provider future, turning a panic into an ordinary failure.
async fn guarded<T, F>(future: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    match AssertUnwindSafe(PROVIDER_CALL.scope((), future))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(_) => Err(ProviderError::panicked()),
    }
}

/// A model load, detached from the controller
pub struct LoadJob {
    provider: Arc<dyn InferenceProvider>,
    model_id: String,
    options: LoadOptions,
}

impl LoadJob {
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub async fn run(self, progress: ProgressSender) -> Result<ModelHandle, ProviderError> {
        guarded(self.provider.load(&self.model_id, &self.options, progress)).await
    }
}

/// A single generation request, detached from the controller
pub struct GenerationJob {
    provider: Arc<dyn InferenceProvider>,
    handle: ModelHandle,
    prompt: String,
    params: GenerationParams,
}

impl GenerationJob {
    #[allow(dead_code)]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    #[allow(dead_code)]
    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    pub async fn run(self) -> Result<String, ProviderError> {
        guarded(self.provider.generate(&self.handle, &self.prompt, &self.params)).await
    }
}

/// Owns the conversation and decides what the user may do next.
///
/// Provider calls are handed out as jobs (`begin_*`) whose results come back
/// through `finish_*`; `request_*` runs the same sequence inline.
pub struct SessionController {
    provider: Arc<dyn InferenceProvider>,
    model_id: String,
    load_options: LoadOptions,
    params: GenerationParams,
    slider: TokenSlider,
    context_turns: usize,
    state: SessionState,
    handle: Option<ModelHandle>,
    log: ConversationLog,
    transcript: Transcript,
    /// Message awaiting its reply
    pending: Option<String>,
    status: String,
    load_failed: bool,
}

impl SessionController {
    pub fn new(config: &Config, provider: Arc<dyn InferenceProvider>) -> Self {
        let generation = &config.generation;
        let slider = TokenSlider::new(
            generation.max_new_tokens,
            generation.min_new_tokens,
            generation.max_new_tokens_limit,
            generation.step,
        );

        Self {
            provider,
            model_id: config.model.id.clone(),
            load_options: config.load_options(),
            params: generation.params(),
            slider,
            context_turns: config.chat.context_turns.max(1),
            state: SessionState::Idle,
            handle: None,
            log: ConversationLog::new(),
            transcript: Transcript::new(),
            pending: None,
            status: "Model not loaded".to_string(),
            load_failed: false,
        }
    }

    fn apply(&mut self, event: SessionEvent) -> bool {
        match transition(self.state, event) {
            Ok(next) => {
                tracing::debug!(from = ?self.state, to = ?next, ?event, "session transition");
                self.state = next;
                true
            }
            Err(e) => {
                tracing::debug!(state = ?self.state, ?event, reason = %e, "request ignored");
                false
            }
        }
    }

    /// Start a load. `None` if one is in flight or the model is already loaded.
    pub fn begin_load(&mut self) -> Option<LoadJob> {
        if !self.apply(SessionEvent::LoadRequested) {
            return None;
        }

        self.status = format!("Loading {}…", self.model_id);
        Some(LoadJob {
            provider: Arc::clone(&self.provider),
            model_id: self.model_id.clone(),
            options: self.load_options.clone(),
        })
    }

    pub fn on_load_progress(&mut self, progress: &LoadProgress) {
        if self.state != SessionState::LoadingModel {
            return;
        }

        self.status = match (&progress.status, &progress.file) {
            (LoadStatus::Ready, _) => "Preparing model…".to_string(),
            (_, Some(file)) => format!("Loading model… {}% ({})", progress.percent(), file),
            (_, None) => format!("Loading model… {}%", progress.percent()),
        };
    }

    pub fn finish_load(&mut self, result: Result<ModelHandle, ProviderError>) -> LoadOutcome {
        if self.state != SessionState::LoadingModel {
            return LoadOutcome::Ignored;
        }

        match result {
            Ok(handle) => {
                self.apply(SessionEvent::LoadSucceeded);
                self.handle = Some(handle);
                self.load_failed = false;
                self.status = "Model ready".to_string();
                self.transcript.push(
                    EntryKind::Notice,
                    format!("{} is loaded. Say hello!", self.model_id),
                );
                LoadOutcome::Ready
            }
            Err(e) => {
                self.apply(SessionEvent::LoadFailed);
                self.load_failed = true;
                let error = ChatError::LoadFailure(e);
                tracing::warn!(model = %self.model_id, error = %error, "model load failed");
                self.status = format!("Error: {error}");
                self.transcript.push(EntryKind::Error, format!("Error: {error}"));
                LoadOutcome::Failed
            }
        }
    }

    /// Load the model inline, reporting each progress event to `on_progress`.
    pub async fn request_model_load<F>(&mut self, mut on_progress: F) -> LoadOutcome
    where
        F: FnMut(&LoadProgress),
    {
        let Some(job) = self.begin_load() else {
            return LoadOutcome::Ignored;
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let run = job.run(tx);
        tokio::pin!(run);

        let result = loop {
            tokio::select! {
                biased;
                Some(progress) = rx.recv() => {
                    self.on_load_progress(&progress);
                    on_progress(&progress);
                }
                result = &mut run => break result,
            }
        };

        while let Ok(progress) = rx.try_recv() {
            self.on_load_progress(&progress);
            on_progress(&progress);
        }

        self.finish_load(result)
    }

    /// Start a send. `None` leaves everything untouched: empty message,
    /// model not ready, or a reply already in flight.
    pub fn begin_send(&mut self, message: &str) -> Option<GenerationJob> {
        let message = message.trim();
        if message.is_empty() {
            return None;
        }
        let handle = self.handle.clone()?;
        if !self.apply(SessionEvent::SendRequested) {
            return None;
        }

        let prompt = build_prompt(&self.log, message, self.context_turns);
        self.transcript.push(EntryKind::User, message);
        self.pending = Some(message.to_string());

        Some(GenerationJob {
            provider: Arc::clone(&self.provider),
            handle,
            prompt,
            params: self.current_params(),
        })
    }

    /// Record the outcome of a generation and return to idle.
    pub fn finish_send(&mut self, result: Result<String, ProviderError>) -> SendOutcome {
        if self.state != SessionState::Generating {
            return SendOutcome::Ignored;
        }

        let message = self.pending.take().unwrap_or_default();
        let outcome = match result {
            Ok(full_text) => {
                let reply = extract_reply(&full_text);
                self.log.push(Turn::user(message));
                self.log.push(Turn::assistant(reply.clone()));
                self.transcript.push(EntryKind::Assistant, reply.clone());
                SendOutcome::Replied(reply)
            }
            Err(e) => {
                let error = ChatError::GenerationFailure(e);
                tracing::warn!(error = %error, "generation failed");
                self.transcript.push(EntryKind::Error, APOLOGY);
                SendOutcome::Failed
            }
        };

        self.apply(SessionEvent::GenerationFinished);
        outcome
    }

    /// Send inline. The state is back to idle on every path out.
    pub async fn request_send(&mut self, message: &str) -> SendOutcome {
        let Some(job) = self.begin_send(message) else {
            return SendOutcome::Ignored;
        };
        let result = job.run().await;
        self.finish_send(result)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    #[allow(dead_code)]
    pub fn model_ready(&self) -> bool {
        self.state.model_ready()
    }

    #[allow(dead_code)]
    pub fn is_generating(&self) -> bool {
        self.state.is_generating()
    }

    pub fn controls(&self) -> Controls {
        let (input_enabled, send_enabled, load_enabled, load_visible) = match self.state {
            SessionState::Idle => (false, false, true, true),
            SessionState::LoadingModel => (false, false, false, true),
            SessionState::ModelReady => (true, true, false, false),
            SessionState::Generating => (true, false, false, false),
        };

        Controls {
            input_enabled,
            send_enabled,
            load_enabled,
            load_visible,
            load_label: if self.load_failed {
                "Retry loading model"
            } else {
                "Load model"
            },
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    #[allow(dead_code)]
    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    /// Short feedback on the status line; ignored while loading so progress
    /// stays visible.
    pub fn set_status(&mut self, status: impl Into<String>) {
        if self.state != SessionState::LoadingModel {
            self.status = status.into();
        }
    }

    /// Informational line in the transcript; never part of a prompt.
    pub fn notice(&mut self, text: impl Into<String>) {
        self.transcript.push(EntryKind::Notice, text);
    }

    pub fn slider(&self) -> &TokenSlider {
        &self.slider
    }

    pub fn max_new_tokens(&self) -> u32 {
        self.slider.value()
    }

    pub fn set_max_new_tokens(&mut self, value: u32) -> u32 {
        self.slider.set(value)
    }

    pub fn step_max_new_tokens(&mut self, steps: i32) -> u32 {
        self.slider.step_by(steps)
    }

    fn current_params(&self) -> GenerationParams {
        GenerationParams {
            max_new_tokens: self.slider.value(),
            ..self.params.clone()
        }
    }
}
