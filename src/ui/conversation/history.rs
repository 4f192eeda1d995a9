//! Transcript display component

use crate::conversation::{EntryKind, Transcript, TranscriptEntry};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Widget},
};

/// Read-only view over the session transcript, pinned to the newest lines.
pub struct TranscriptView<'a> {
    transcript: &'a Transcript,
}

impl<'a> TranscriptView<'a> {
    pub fn new(transcript: &'a Transcript) -> Self {
        Self { transcript }
    }

    /// Render a single entry into lines
    fn entry_lines(entry: &TranscriptEntry, width: u16) -> Vec<Line<'static>> {
        let mut lines = Vec::new();

        let role_icon = match entry.kind {
            EntryKind::User => "👤",
            EntryKind::Assistant => "🤖",
            EntryKind::Notice => "ℹ️",
            EntryKind::Error => "❌",
        };

        let timestamp = entry.timestamp.format("%H:%M:%S").to_string();
        let header = format!("{} {} {}", role_icon, timestamp, "─".repeat(20));

        lines.push(Line::from(vec![Span::styled(
            header,
            Style::default().fg(Color::DarkGray),
        )]));

        let style = content_style(entry.kind);
        for paragraph in entry.content.lines() {
            for content_line in wrap_text(paragraph, width.saturating_sub(2) as usize) {
                lines.push(Line::from(vec![
                    Span::raw("  "),
                    Span::styled(content_line, style),
                ]));
            }
        }

        lines
    }
}

impl Widget for TranscriptView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title("💬 Conversation");

        let inner_area = block.inner(area);
        block.render(area, buf);

        if self.transcript.is_empty() {
            let welcome_lines = [
                Line::from(vec![Span::styled(
                    "Welcome to Parley!",
                    Style::default().fg(Color::Green),
                )]),
                Line::from(""),
                Line::from(vec![Span::styled(
                    "Press Ctrl+L (or type /load) to fetch the model.",
                    Style::default().fg(Color::Gray),
                )]),
                Line::from(vec![Span::styled(
                    "Up/Down adjusts the reply length. /help lists commands.",
                    Style::default().fg(Color::DarkGray),
                )]),
            ];

            for (i, line) in welcome_lines.iter().enumerate() {
                if i < inner_area.height as usize {
                    buf.set_line(inner_area.x, inner_area.y + i as u16, line, inner_area.width);
                }
            }
            return;
        }

        let mut all_lines: Vec<Line> = Vec::new();
        for entry in self.transcript.entries() {
            all_lines.extend(Self::entry_lines(entry, inner_area.width));
            all_lines.push(Line::from(""));
        }

        // Show the tail that fits
        let height = inner_area.height as usize;
        let start = all_lines.len().saturating_sub(height);

        for (i, line) in all_lines[start..].iter().enumerate() {
            buf.set_line(inner_area.x, inner_area.y + i as u16, line, inner_area.width);
        }
    }
}

fn content_style(kind: EntryKind) -> Style {
    match kind {
        EntryKind::User => Style::default().fg(Color::Blue),
        EntryKind::Assistant => Style::default().fg(Color::Green),
        EntryKind::Notice => Style::default().fg(Color::Yellow),
        EntryKind::Error => Style::default().fg(Color::Red),
    }
}

/// Wrap text to fit within the given width, measured in characters.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    if width == 0 {
        return vec![text.to_string()];
    }

    let mut lines = Vec::new();
    let mut current_line = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if current_len == 0 {
            current_line.push_str(word);
            current_len = word_len;
        } else if current_len + word_len < width {
            current_line.push(' ');
            current_line.push_str(word);
            current_len += word_len + 1;
        } else {
            lines.push(std::mem::take(&mut current_line));
            current_line.push_str(word);
            current_len = word_len;
        }
    }

    if !current_line.is_empty() {
        lines.push(current_line);
    }

    if lines.is_empty() {
        lines.push(String::new());
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_text(buf: &Buffer) -> String {
        let area = buf.area;
        let mut text = String::new();
        for y in area.top()..area.bottom() {
            for x in area.left()..area.right() {
                text.push_str(buf.get(x, y).symbol());
            }
            text.push('\n');
        }
        text
    }

    #[test]
    fn wrap_text_breaks_on_words() {
        assert_eq!(wrap_text("one two three", 8), vec!["one two", "three"]);
        assert_eq!(wrap_text("", 10), vec![String::new()]);
        assert_eq!(wrap_text("unbreakableword", 4), vec!["unbreakableword"]);
        assert_eq!(wrap_text("a b", 0), vec!["a b"]);
    }

    #[test]
    fn empty_transcript_shows_welcome() {
        let transcript = Transcript::new();
        let area = Rect::new(0, 0, 70, 8);
        let mut buf = Buffer::empty(area);
        TranscriptView::new(&transcript).render(area, &mut buf);
        assert!(buffer_text(&buf).contains("Welcome to Parley!"));
    }

    #[test]
    fn renders_latest_entries() {
        let mut transcript = Transcript::new();
        for i in 0..10 {
            transcript.push(EntryKind::User, format!("message {i}"));
        }
        transcript.push(EntryKind::Assistant, "latest reply.");

        let area = Rect::new(0, 0, 40, 6);
        let mut buf = Buffer::empty(area);
        TranscriptView::new(&transcript).render(area, &mut buf);

        let text = buffer_text(&buf);
        assert!(text.contains("latest reply."));
        assert!(!text.contains("message 0"));
    }
}
