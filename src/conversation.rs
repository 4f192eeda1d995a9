use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who authored a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Label used when the turn is rendered into a prompt.
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

/// A single message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    role: Role,
    content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Append-only, chronological log of turns used to build prompts.
#[derive(Debug, Clone, Default)]
pub struct ConversationLog {
    turns: Vec<Turn>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// The last `min(k, len)` turns, oldest first.
    pub fn recent(&self, k: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(k);
        &self.turns[start..]
    }

    #[allow(dead_code)]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Kind of a visible transcript line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    User,
    Assistant,
    /// Informational line (model ready, help output)
    Notice,
    /// Load failure or generation apology
    Error,
}

#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub kind: EntryKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// What the user sees. Unlike the log, it carries notices and errors.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: EntryKind, content: impl Into<String>) {
        self.entries.push(TranscriptEntry {
            kind,
            content: content.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    #[allow(dead_code)]
    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.last()
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_of(n: usize) -> ConversationLog {
        let mut log = ConversationLog::new();
        for i in 0..n {
            if i % 2 == 0 {
                log.push(Turn::user(format!("u{i}")));
            } else {
                log.push(Turn::assistant(format!("a{i}")));
            }
        }
        log
    }

    #[test]
    fn recent_returns_tail_in_order() {
        let log = log_of(6);
        let recent = log.recent(4);
        let contents: Vec<_> = recent.iter().map(Turn::content).collect();
        assert_eq!(contents, vec!["u2", "a3", "u4", "a5"]);
    }

    #[test]
    fn recent_on_short_log_returns_everything() {
        let log = log_of(2);
        assert_eq!(log.recent(4).len(), 2);
        assert!(ConversationLog::new().recent(4).is_empty());
    }

    #[test]
    fn role_labels() {
        assert_eq!(Role::User.label(), "User");
        assert_eq!(Role::Assistant.label(), "Assistant");
    }

    #[test]
    fn transcript_keeps_insertion_order() {
        let mut transcript = Transcript::new();
        transcript.push(EntryKind::User, "hi");
        transcript.push(EntryKind::Error, "oops");
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.entries()[0].kind, EntryKind::User);
        assert_eq!(transcript.last().map(|e| e.content.as_str()), Some("oops"));
    }
}
