pub mod conversation;

pub use conversation::{ChatAction, ChatScreen};
