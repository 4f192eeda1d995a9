//! Chat screen components

pub mod commands;
pub mod composer;
pub mod history;
pub mod indicator;
pub mod manager;
pub mod slider;

pub use commands::{ParsedCommand, SlashCommand, get_help_text};
pub use composer::ConversationComposer;
pub use history::TranscriptView;
pub use indicator::ActivityIndicator;
pub use manager::{ChatAction, ChatScreen};
pub use slider::TokenSliderView;
