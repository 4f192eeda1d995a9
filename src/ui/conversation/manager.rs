use crate::session::{Controls, SessionController};
use crate::ui::conversation::composer::{ConversationComposer, ConversationResult};
use crate::ui::conversation::{
    ActivityIndicator, ParsedCommand, SlashCommand, TokenSliderView, TranscriptView,
};
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
};

/// Actions requested by the chat screen, carried out by the app
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatAction {
    None,
    Send(String),
    Load,
    StepTokens(i32),
    SetTokens(u32),
    Help,
    /// Line to show the user without touching the session
    Notice(String),
    Quit,
}

/// Lays out the chat UI and turns key presses into actions
pub struct ChatScreen {
    composer: ConversationComposer,
    frame: u64,
}

impl ChatScreen {
    pub fn new(controls: Controls) -> Self {
        Self {
            composer: ConversationComposer::new(controls),
            frame: 0,
        }
    }

    /// Refresh gating after the session changed state.
    pub fn sync(&mut self, controls: Controls) {
        self.composer.sync(controls);
    }

    /// Advance the activity animation.
    pub fn tick(&mut self) {
        self.frame = self.frame.wrapping_add(1);
    }

    pub fn clear_input(&mut self) {
        self.composer.clear();
    }

    pub fn input(&self) -> &str {
        self.composer.content()
    }

    pub fn paste(&mut self, text: &str) {
        self.composer.paste(text);
    }

    /// Handle key input
    pub fn handle_key(&mut self, key: KeyEvent) -> ChatAction {
        if key.kind != KeyEventKind::Press {
            return ChatAction::None;
        }

        if key.modifiers.contains(KeyModifiers::CONTROL) {
            return match key.code {
                KeyCode::Char('c') => ChatAction::Quit,
                KeyCode::Char('l') => ChatAction::Load,
                _ => ChatAction::None,
            };
        }

        if !self.composer.palette_open() {
            match key.code {
                KeyCode::Esc => return ChatAction::Quit,
                KeyCode::Up => return ChatAction::StepTokens(1),
                KeyCode::Down => return ChatAction::StepTokens(-1),
                _ => {}
            }
        }

        match self.composer.handle_key(key) {
            ConversationResult::Submitted(message) => ChatAction::Send(message),
            ConversationResult::Command(command) => Self::command_action(command),
            ConversationResult::None => ChatAction::None,
        }
    }

    fn command_action(command: ParsedCommand) -> ChatAction {
        match command.command {
            SlashCommand::Load => ChatAction::Load,
            SlashCommand::Tokens => match command.tokens_target() {
                Some(value) => ChatAction::SetTokens(value),
                None => ChatAction::Notice("Usage: /tokens <number>".to_string()),
            },
            SlashCommand::Help => ChatAction::Help,
            SlashCommand::Bye => ChatAction::Quit,
        }
    }

    pub fn render(&self, frame: &mut Frame, session: &SessionController) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1), // Header
                Constraint::Min(5),    // Transcript
                Constraint::Length(1), // Activity
                Constraint::Length(1), // Slider
                Constraint::Length(3), // Composer
            ])
            .split(frame.size());

        frame.render_widget(Self::header(session), chunks[0]);
        frame.render_widget(TranscriptView::new(session.transcript()), chunks[1]);
        frame.render_widget(
            ActivityIndicator::new(session.state(), session.status(), self.frame),
            chunks[2],
        );
        frame.render_widget(TokenSliderView::new(session.slider()), chunks[3]);
        frame.render_widget(&self.composer, chunks[4]);
    }

    fn header(session: &SessionController) -> Paragraph<'static> {
        let controls = session.controls();
        let mut spans = vec![
            Span::styled(
                format!(" {} ", session.model_id()),
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!("via {} ", session.provider_name()),
                Style::default().fg(Color::DarkGray),
            ),
        ];

        if controls.load_visible {
            let style = if controls.load_enabled {
                Style::default().fg(Color::Black).bg(Color::Green)
            } else {
                Style::default().fg(Color::Gray).bg(Color::DarkGray)
            };
            spans.push(Span::styled(format!(" Ctrl+L: {} ", controls.load_label), style));
        }

        Paragraph::new(Line::from(spans))
    }
}
