use crate::session::Controls;
use crate::ui::conversation::commands::{
    CommandEntry, ParsedCommand, command_entries, parse_slash_command,
};
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Widget},
};

/// Result returned when the user interacts with the conversation composer
#[derive(Debug, PartialEq)]
pub enum ConversationResult {
    /// Enter on a plain message. The text stays in the box until the
    /// session accepts it.
    Submitted(String),
    Command(ParsedCommand),
    None,
}

/// State for the text area within the composer
#[derive(Debug, Clone, Default)]
pub struct TextAreaState {
    pub content: String,
    /// Cursor position in characters
    pub cursor_position: usize,
}

impl TextAreaState {
    fn byte_index(&self) -> usize {
        self.content
            .char_indices()
            .nth(self.cursor_position)
            .map(|(index, _)| index)
            .unwrap_or(self.content.len())
    }

    fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// Conversation composer for user input
#[derive(Clone)]
pub struct ConversationComposer {
    state: TextAreaState,
    controls: Controls,
    command_entries: Vec<CommandEntry>,
    filtered_commands: Vec<CommandEntry>,
    show_command_palette: bool,
    selected_command: Option<usize>,
}

impl ConversationComposer {
    pub fn new(controls: Controls) -> Self {
        Self {
            state: TextAreaState::default(),
            controls,
            command_entries: command_entries(),
            filtered_commands: Vec::new(),
            show_command_palette: false,
            selected_command: None,
        }
    }

    /// Keep gating in step with the session.
    pub fn sync(&mut self, controls: Controls) {
        self.controls = controls;
    }

    /// Whether a keystroke may change the text. While input is disabled only
    /// slash commands can be typed.
    fn accepts_text(&self, next: char) -> bool {
        self.controls.input_enabled
            || self.state.content.starts_with('/')
            || (self.state.content.is_empty() && next == '/')
    }

    /// Handle key input
    pub fn handle_key(&mut self, key: KeyEvent) -> ConversationResult {
        if key.kind != KeyEventKind::Press {
            return ConversationResult::None;
        }

        match key.code {
            KeyCode::Enter => {
                if self.show_command_palette && self.selected_command.is_some() {
                    let entry = self.selected_command.and_then(|i| self.filtered_commands.get(i).copied());
                    // A fully typed command runs straight away.
                    if let Some(entry) = entry {
                        if self.state.content.trim() != format!("/{}", entry.keyword) {
                            self.apply_selected_command();
                            return ConversationResult::None;
                        }
                    }
                }
                return self.submit();
            }
            KeyCode::Up if self.show_command_palette => self.move_command_selection(-1),
            KeyCode::Down if self.show_command_palette => self.move_command_selection(1),
            KeyCode::Esc if self.show_command_palette => self.close_command_palette(),
            KeyCode::Tab if self.show_command_palette => {
                self.apply_selected_command();
            }
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                if !self.accepts_text(c) {
                    return ConversationResult::None;
                }
                self.insert_char(c);

                if self.state.content.starts_with('/') && !self.state.content.contains(' ') {
                    if self.show_command_palette {
                        self.refresh_command_palette();
                    } else {
                        self.open_command_palette();
                    }
                } else {
                    self.close_command_palette();
                }
            }
            KeyCode::Backspace => {
                if self.backspace() {
                    self.after_delete();
                }
            }
            KeyCode::Delete => {
                if self.delete() {
                    self.after_delete();
                }
            }
            KeyCode::Left => {
                self.state.cursor_position = self.state.cursor_position.saturating_sub(1);
            }
            KeyCode::Right => {
                if self.state.cursor_position < self.state.char_len() {
                    self.state.cursor_position += 1;
                }
            }
            KeyCode::Home => {
                self.state.cursor_position = 0;
            }
            KeyCode::End => {
                self.state.cursor_position = self.state.char_len();
            }
            _ => {}
        }

        ConversationResult::None
    }

    /// Insert pasted text, flattened to one line.
    pub fn paste(&mut self, text: &str) {
        for c in text.chars() {
            let c = if c == '\n' || c == '\r' { ' ' } else { c };
            if self.accepts_text(c) {
                self.insert_char(c);
            }
        }
    }

    fn submit(&mut self) -> ConversationResult {
        let content = self.state.content.clone();
        if content.trim().is_empty() {
            return ConversationResult::None;
        }

        if let Some(command) = parse_slash_command(&content) {
            self.clear();
            return ConversationResult::Command(command);
        }

        if !self.controls.send_enabled {
            return ConversationResult::None;
        }
        ConversationResult::Submitted(content)
    }

    fn after_delete(&mut self) {
        if self.show_command_palette {
            if self.state.content.starts_with('/') {
                self.refresh_command_palette();
            } else {
                self.close_command_palette();
            }
        }
    }

    /// Insert a character at the cursor position
    fn insert_char(&mut self, c: char) {
        let index = self.state.byte_index();
        self.state.content.insert(index, c);
        self.state.cursor_position += 1;
    }

    /// Delete character before cursor
    fn backspace(&mut self) -> bool {
        if self.state.cursor_position > 0 {
            self.state.cursor_position -= 1;
            let index = self.state.byte_index();
            self.state.content.remove(index);
            true
        } else {
            false
        }
    }

    /// Delete character at cursor
    fn delete(&mut self) -> bool {
        if self.state.cursor_position < self.state.char_len() {
            let index = self.state.byte_index();
            self.state.content.remove(index);
            true
        } else {
            false
        }
    }

    fn open_command_palette(&mut self) {
        self.show_command_palette = true;
        self.selected_command = Some(0);
        self.refresh_command_palette();
    }

    fn close_command_palette(&mut self) {
        self.show_command_palette = false;
        self.filtered_commands.clear();
        self.selected_command = None;
    }

    fn refresh_command_palette(&mut self) {
        let query = self.state.content.trim_start_matches('/').to_lowercase();
        self.filtered_commands = self
            .command_entries
            .iter()
            .filter(|entry| query.is_empty() || entry.keyword.starts_with(&query))
            .copied()
            .collect();

        if self.filtered_commands.is_empty() {
            self.selected_command = None;
        } else {
            let index = self.selected_command.unwrap_or(0);
            self.selected_command = Some(index.min(self.filtered_commands.len() - 1));
        }
    }

    fn move_command_selection(&mut self, delta: isize) {
        if self.filtered_commands.is_empty() {
            self.selected_command = None;
            return;
        }

        let current = self.selected_command.unwrap_or(0) as isize;
        let len = self.filtered_commands.len() as isize;
        let next = (current + delta).rem_euclid(len);
        self.selected_command = Some(next as usize);
    }

    fn apply_selected_command(&mut self) -> bool {
        let Some(entry) = self
            .selected_command
            .and_then(|index| self.filtered_commands.get(index).copied())
        else {
            return false;
        };

        self.state.content = format!("/{} ", entry.keyword);
        self.state.cursor_position = self.state.char_len();
        self.close_command_palette();
        true
    }

    pub fn palette_open(&self) -> bool {
        self.show_command_palette
    }

    /// Get current content
    pub fn content(&self) -> &str {
        &self.state.content
    }

    /// Clear content
    pub fn clear(&mut self) {
        self.state = TextAreaState::default();
        self.close_command_palette();
    }

    fn title(&self) -> &'static str {
        if self.controls.send_enabled {
            "✏️  Message - Enter to send"
        } else if self.controls.input_enabled {
            "⏳ Waiting for the reply..."
        } else {
            "🔒 Load the model first (Ctrl+L or /load)"
        }
    }

    fn placeholder(&self) -> &'static str {
        if self.controls.input_enabled {
            "Say something..."
        } else {
            "Type /load to fetch the model, /help for commands"
        }
    }
}

impl Widget for &ConversationComposer {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let state = &self.state;

        let border_style = if self.controls.input_enabled {
            Style::default().fg(Color::Green)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        let block = Block::default()
            .borders(Borders::ALL)
            .title(self.title())
            .style(border_style);

        let inner_area = block.inner(area);
        block.render(area, buf);

        // Render content or placeholder
        if state.content.is_empty() {
            let placeholder_line = Line::from(vec![Span::styled(
                self.placeholder(),
                Style::default().fg(Color::DarkGray),
            )]);
            buf.set_line(inner_area.x, inner_area.y, &placeholder_line, inner_area.width);
        } else {
            let mut content = state.content.clone();
            content.insert(state.byte_index(), '▌');
            let line = Line::from(vec![Span::raw(content)]);
            buf.set_line(inner_area.x, inner_area.y, &line, inner_area.width);
        }

        // Render command palette above the composer
        if self.show_command_palette && !self.filtered_commands.is_empty() {
            let palette_height = (self.filtered_commands.len().min(5) + 2) as u16;
            let palette_area = Rect {
                x: area.x,
                y: area.y.saturating_sub(palette_height),
                width: area.width,
                height: palette_height.min(area.y),
            };
            if palette_area.height < 3 {
                return;
            }

            let block = Block::default()
                .borders(Borders::ALL)
                .title("Commands")
                .style(Style::default().fg(Color::Blue));
            let inner = block.inner(palette_area);
            ratatui::widgets::Clear.render(palette_area, buf);
            block.render(palette_area, buf);

            for (index, entry) in self.filtered_commands.iter().enumerate() {
                if index >= inner.height as usize {
                    break;
                }

                let style = if self.selected_command == Some(index) {
                    Style::default()
                        .fg(Color::Black)
                        .bg(Color::Cyan)
                        .add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(Color::White)
                };

                let line = Line::from(vec![
                    Span::styled(format!("/{}", entry.keyword), style),
                    Span::styled(" - ", Style::default().fg(Color::DarkGray)),
                    Span::styled(entry.description, Style::default().fg(Color::Gray)),
                ]);

                buf.set_line(inner.x, inner.y + index as u16, &line, inner.width);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::conversation::commands::SlashCommand;

    fn controls(input: bool, send: bool) -> Controls {
        Controls {
            input_enabled: input,
            send_enabled: send,
            load_enabled: !input,
            load_visible: !input,
            load_label: "Load model",
        }
    }

    fn press(composer: &mut ConversationComposer, code: KeyCode) -> ConversationResult {
        composer.handle_key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn type_text(composer: &mut ConversationComposer, text: &str) {
        for c in text.chars() {
            press(composer, KeyCode::Char(c));
        }
    }

    #[test]
    fn submit_keeps_text_until_accepted() {
        let mut composer = ConversationComposer::new(controls(true, true));
        type_text(&mut composer, "héllo");
        assert_eq!(
            press(&mut composer, KeyCode::Enter),
            ConversationResult::Submitted("héllo".to_string())
        );
        assert_eq!(composer.content(), "héllo");
    }

    #[test]
    fn disabled_input_only_takes_commands() {
        let mut composer = ConversationComposer::new(controls(false, false));
        type_text(&mut composer, "hi");
        assert_eq!(composer.content(), "");

        type_text(&mut composer, "/load");
        let result = press(&mut composer, KeyCode::Enter);
        match result {
            ConversationResult::Command(command) => assert_eq!(command.command, SlashCommand::Load),
            other => panic!("expected command, got {other:?}"),
        }
        assert_eq!(composer.content(), "");
    }

    #[test]
    fn enter_does_nothing_while_send_disabled() {
        let mut composer = ConversationComposer::new(controls(true, false));
        type_text(&mut composer, "wait");
        assert_eq!(press(&mut composer, KeyCode::Enter), ConversationResult::None);
        assert_eq!(composer.content(), "wait");
    }

    #[test]
    fn palette_completes_partial_command() {
        let mut composer = ConversationComposer::new(controls(true, true));
        type_text(&mut composer, "/to");
        assert!(composer.palette_open());
        assert_eq!(press(&mut composer, KeyCode::Tab), ConversationResult::None);
        assert_eq!(composer.content(), "/tokens ");

        type_text(&mut composer, "30");
        match press(&mut composer, KeyCode::Enter) {
            ConversationResult::Command(command) => assert_eq!(command.tokens_target(), Some(30)),
            other => panic!("expected command, got {other:?}"),
        }
    }

    #[test]
    fn editing_handles_multibyte_text() {
        let mut composer = ConversationComposer::new(controls(true, true));
        type_text(&mut composer, "añb");
        press(&mut composer, KeyCode::Left);
        press(&mut composer, KeyCode::Backspace);
        assert_eq!(composer.content(), "ab");
        press(&mut composer, KeyCode::Home);
        press(&mut composer, KeyCode::Delete);
        assert_eq!(composer.content(), "b");
    }

    #[test]
    fn paste_flattens_newlines() {
        let mut composer = ConversationComposer::new(controls(true, true));
        composer.paste("one\ntwo");
        assert_eq!(composer.content(), "one two");
    }
}
