use crate::conversation::{ConversationLog, Role};

/// Marker the model continues from.
pub const GENERATION_CUE: &str = "Assistant:";

/// Number of prior turns rendered into a prompt by default.
pub const DEFAULT_CONTEXT_TURNS: usize = 4;

/// Render the last `window` turns plus the new message into a prompt.
pub fn build_prompt(log: &ConversationLog, message: &str, window: usize) -> String {
    let mut lines: Vec<String> = log
        .recent(window)
        .iter()
        .map(|turn| format!("{}: {}", turn.role().label(), turn.content()))
        .collect();

    lines.push(format!("{}: {}", Role::User.label(), message));
    lines.push(GENERATION_CUE.to_string());
    lines.join("\n")
}

/// Reduce the provider's full output to a single short reply.
///
/// Takes the text after the last `Assistant:` cue, flattens whitespace and
/// keeps everything before the first `.`. The period split is a brevity cut,
/// not sentence detection: abbreviations and decimals end the reply early.
pub fn extract_reply(full_text: &str) -> String {
    let continuation = full_text
        .rsplit(GENERATION_CUE)
        .next()
        .unwrap_or_default()
        .trim();

    let flattened = normalize_whitespace(continuation);
    let first = flattened.split('.').next().unwrap_or_default();
    format!("{first}.")
}

/// Collapse newline runs and then any whitespace run into a single space.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
