use super::{
    GenerationParams, InferenceProvider, LoadOptions, LoadProgress, LoadStatus, ModelHandle,
    ProgressSender, ProviderError,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Marker stored inside handles this provider hands out.
struct ScriptedModel;

/// Provider that returns queued responses in order.
///
/// With nothing queued it either fails or, in echo mode, answers by repeating
/// the user's last message.
#[derive(Default)]
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<String, ProviderError>>>,
    load_failures: Mutex<VecDeque<ProviderError>>,
    panic_next_load: AtomicBool,
    panic_next_generate: AtomicBool,
    echo: bool,
    prompts: Mutex<Vec<String>>,
    pub load_calls: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider for `--offline`: loads instantly and echoes the user.
    pub fn echo() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    /// Queue the full text (prompt plus continuation) for the next generate.
    #[allow(dead_code)]
    pub fn queue_text(&self, text: impl Into<String>) {
        lock(&self.responses).push_back(Ok(text.into()));
    }

    #[allow(dead_code)]
    pub fn queue_error(&self, error: ProviderError) {
        lock(&self.responses).push_back(Err(error));
    }

    /// Make the next load fail with `error`.
    #[allow(dead_code)]
    pub fn fail_next_load(&self, error: ProviderError) {
        lock(&self.load_failures).push_back(error);
    }

    #[allow(dead_code)]
    pub fn panic_on_next_load(&self) {
        self.panic_next_load.store(true, Ordering::SeqCst);
    }

    #[allow(dead_code)]
    pub fn panic_on_next_generate(&self) {
        self.panic_next_generate.store(true, Ordering::SeqCst);
    }

    #[allow(dead_code)]
    pub fn recorded_prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    fn echo_reply(prompt: &str) -> String {
        let said = prompt
            .lines()
            .rev()
            .find_map(|line| line.strip_prefix("User: "))
            .unwrap_or_default();
        format!("{prompt} You said \"{said}\" but I am offline")
    }
}

#[async_trait]
impl InferenceProvider for ScriptedProvider {
    async fn load(
        &self,
        model_id: &str,
        options: &LoadOptions,
        progress: ProgressSender,
    ) -> Result<ModelHandle, ProviderError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_next_load.swap(false, Ordering::SeqCst) {
            panic!("scripted provider asked to panic during load");
        }

        let total = options.files.len().max(1) as f32;
        for (index, file) in options.files.iter().enumerate() {
            let done = index as f32 / total;
            let _ = progress.send(LoadProgress::new(LoadStatus::Initiate, Some(file.clone()), done));
            let _ = progress.send(LoadProgress::new(
                LoadStatus::Progress,
                Some(file.clone()),
                done + 0.5 / total,
            ));
            let _ = progress.send(LoadProgress::new(
                LoadStatus::Done,
                Some(file.clone()),
                (index + 1) as f32 / total,
            ));
        }

        if let Some(error) = lock(&self.load_failures).pop_front() {
            return Err(error);
        }

        let _ = progress.send(LoadProgress::new(LoadStatus::Ready, None, 1.0));
        Ok(ModelHandle::new(model_id, ScriptedModel))
    }

    async fn generate(
        &self,
        handle: &ModelHandle,
        prompt: &str,
        _params: &GenerationParams,
    ) -> Result<String, ProviderError> {
        handle.downcast::<ScriptedModel>()?;
        lock(&self.prompts).push(prompt.to_string());

        if self.panic_next_generate.swap(false, Ordering::SeqCst) {
            panic!("scripted provider asked to panic");
        }

        let next = lock(&self.responses).pop_front();
        match next {
            Some(response) => response,
            None if self.echo => Ok(Self::echo_reply(prompt)),
            None => Err(ProviderError::scripted("no scripted response queued")),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ProviderErrorKind;
    use tokio::sync::mpsc;

    async fn loaded(provider: &ScriptedProvider) -> ModelHandle {
        let (tx, _rx) = mpsc::unbounded_channel();
        provider
            .load("tiny", &LoadOptions::default(), tx)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn replays_queue_in_order() {
        let provider = ScriptedProvider::new();
        provider.queue_text("one");
        provider.queue_error(ProviderError::network("down"));
        let handle = loaded(&provider).await;
        let params = GenerationParams::default();

        assert_eq!(provider.generate(&handle, "p1", &params).await.unwrap(), "one");
        let err = provider.generate(&handle, "p2", &params).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Network);
        let err = provider.generate(&handle, "p3", &params).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Scripted);
        assert_eq!(provider.recorded_prompts(), vec!["p1", "p2", "p3"]);
    }

    #[tokio::test]
    async fn load_reports_monotonic_progress_and_ready() {
        let provider = ScriptedProvider::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        provider
            .load("tiny", &LoadOptions::default(), tx)
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(events.windows(2).all(|w| w[0].progress <= w[1].progress));
        let last = events.last().unwrap();
        assert_eq!(last.status, LoadStatus::Ready);
        assert_eq!(last.progress, 1.0);
    }

    #[tokio::test]
    async fn scripted_load_failure() {
        let provider = ScriptedProvider::new();
        provider.fail_next_load(ProviderError::http(404, "not found"));
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = provider
            .load("missing", &LoadOptions::default(), tx)
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::llm::ProviderErrorKind::Http);
        assert_eq!(provider.load_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn echo_mode_repeats_user() {
        let provider = ScriptedProvider::echo();
        let handle = loaded(&provider).await;
        let text = provider
            .generate(&handle, "User: ping\nAssistant:", &GenerationParams::default())
            .await
            .unwrap();
        assert!(text.ends_with("You said \"ping\" but I am offline"));
    }

    #[tokio::test]
    async fn rejects_foreign_handle() {
        let provider = ScriptedProvider::new();
        let handle = ModelHandle::new("other", 1u8);
        let err = provider
            .generate(&handle, "p", &GenerationParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::InvalidHandle);
    }
}
