mod error;
mod http;
mod scripted;

pub use error::{ProviderError, ProviderErrorKind};
pub use http::HttpProvider;
pub use scripted::ScriptedProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Channel the provider reports load progress on.
pub type ProgressSender = mpsc::UnboundedSender<LoadProgress>;

/// Common interface for inference backends
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Fetch and prepare a model, reporting progress as it goes.
    async fn load(
        &self,
        model_id: &str,
        options: &LoadOptions,
        progress: ProgressSender,
    ) -> Result<ModelHandle, ProviderError>;

    /// Run a single generation round-trip. The returned text is the prompt
    /// followed by the continuation.
    async fn generate(
        &self,
        handle: &ModelHandle,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, ProviderError>;

    /// Short name for logs and the status line.
    fn name(&self) -> &str;
}

/// Opaque capability returned by a successful load.
#[derive(Clone)]
pub struct ModelHandle {
    model_id: String,
    inner: Arc<dyn Any + Send + Sync>,
}

impl ModelHandle {
    pub fn new<T: Any + Send + Sync>(model_id: impl Into<String>, inner: T) -> Self {
        Self {
            model_id: model_id.into(),
            inner: Arc::new(inner),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Only the provider that created the handle knows `T`.
    pub(crate) fn downcast<T: Any + Send + Sync>(&self) -> Result<&T, ProviderError> {
        self.inner.downcast_ref::<T>().ok_or_else(|| {
            ProviderError::invalid_handle(format!(
                "handle for '{}' was not created by this provider",
                self.model_id
            ))
        })
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("model_id", &self.model_id)
            .finish_non_exhaustive()
    }
}

/// Options passed through to the provider's load step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadOptions {
    pub revision: String,
    /// Files fetched from the model repository
    pub files: Vec<String>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            revision: "main".to_string(),
            files: vec![
                "config.json".to_string(),
                "tokenizer_config.json".to_string(),
                "generation_config.json".to_string(),
            ],
        }
    }
}

/// Stage of a model load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Initiate,
    Download,
    Progress,
    Done,
    Ready,
}

/// A single progress report from the provider
#[derive(Debug, Clone, PartialEq)]
pub struct LoadProgress {
    pub status: LoadStatus,
    pub file: Option<String>,
    /// Overall fraction complete, always within `[0, 1]`
    pub progress: f32,
}

impl LoadProgress {
    pub fn new(status: LoadStatus, file: Option<String>, progress: f32) -> Self {
        let progress = if progress.is_nan() {
            0.0
        } else {
            progress.clamp(0.0, 1.0)
        };
        Self {
            status,
            file,
            progress,
        }
    }

    pub fn percent(&self) -> u32 {
        (self.progress * 100.0).round() as u32
    }
}

/// Sampling parameters sent with every generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub do_sample: bool,
    pub repetition_penalty: f32,
    pub pad_token_id: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 50,
            temperature: 0.7,
            do_sample: true,
            repetition_penalty: 1.2,
            pad_token_id: 50256,
        }
    }
}

/// Logging wrapper for inference providers
pub struct LoggingProvider {
    inner: Arc<dyn InferenceProvider>,
}

impl LoggingProvider {
    pub fn new(inner: Arc<dyn InferenceProvider>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl InferenceProvider for LoggingProvider {
    async fn load(
        &self,
        model_id: &str,
        options: &LoadOptions,
        progress: ProgressSender,
    ) -> Result<ModelHandle, ProviderError> {
        let start = std::time::Instant::now();
        tracing::info!(provider = self.inner.name(), model = model_id, "loading model");
        let result = self.inner.load(model_id, options, progress).await;
        let duration = start.elapsed();

        match &result {
            Ok(_) => tracing::info!(
                provider = self.inner.name(),
                model = model_id,
                duration_ms = %duration.as_millis(),
                "model loaded"
            ),
            Err(e) => tracing::error!(
                provider = self.inner.name(),
                model = model_id,
                duration_ms = %duration.as_millis(),
                kind = ?e.kind,
                error = %e.message,
                "model load failed"
            ),
        }

        result
    }

    async fn generate(
        &self,
        handle: &ModelHandle,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, ProviderError> {
        let start = std::time::Instant::now();
        let result = self.inner.generate(handle, prompt, params).await;
        let duration = start.elapsed();

        match &result {
            Ok(text) => tracing::info!(
                model = handle.model_id(),
                duration_ms = %duration.as_millis(),
                prompt_chars = prompt.len(),
                output_chars = text.len(),
                max_new_tokens = params.max_new_tokens,
                "generation completed"
            ),
            Err(e) => tracing::error!(
                model = handle.model_id(),
                duration_ms = %duration.as_millis(),
                kind = ?e.kind,
                error = %e.message,
                "generation failed"
            ),
        }

        result
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
