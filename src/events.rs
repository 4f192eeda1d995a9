use crossterm::event::KeyEvent;

use crate::llm::{LoadProgress, ModelHandle, ProviderError};

/// Everything the event loop reacts to: terminal input plus completions of
/// jobs running on background tasks.
#[derive(Debug)]
pub enum AppEvent {
    /// Key press event
    Key(KeyEvent),

    /// Paste event
    Paste(String),

    /// Terminal resize
    Resize(u16, u16),

    /// Animation tick
    Tick,

    /// Progress reported by the provider during a load
    LoadProgress(LoadProgress),

    /// Model load finished, successfully or not
    LoadFinished(Result<ModelHandle, ProviderError>),

    /// Generation finished, successfully or not
    GenerationFinished(Result<String, ProviderError>),
}
