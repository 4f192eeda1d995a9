use crate::session::SessionState;
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Style},
    text::{Line, Span},
    widgets::Widget,
};

/// One-line activity indicator shown while the model loads or a reply is
/// being generated.
pub struct ActivityIndicator<'a> {
    state: SessionState,
    status: &'a str,
    frame: u64,
}

impl<'a> ActivityIndicator<'a> {
    pub fn new(state: SessionState, status: &'a str, frame: u64) -> Self {
        Self {
            state,
            status,
            frame,
        }
    }

    fn dots(&self) -> &'static str {
        match self.frame % 4 {
            0 => ".",
            1 => "..",
            2 => "...",
            _ => "   ",
        }
    }
}

impl Widget for ActivityIndicator<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        if area.height == 0 {
            return;
        }

        let line = match self.state {
            SessionState::Generating => Line::from(vec![
                Span::styled("🤖 ", Style::default().fg(Color::Green)),
                Span::styled("Thinking", Style::default().fg(Color::Green)),
                Span::styled(self.dots(), Style::default().fg(Color::Yellow)),
            ]),
            SessionState::LoadingModel => Line::from(vec![
                Span::styled("⏬ ", Style::default().fg(Color::Cyan)),
                Span::styled(self.status.to_string(), Style::default().fg(Color::Cyan)),
            ]),
            SessionState::Idle | SessionState::ModelReady => Line::from(vec![Span::styled(
                self.status.to_string(),
                Style::default().fg(Color::DarkGray),
            )]),
        };

        buf.set_line(area.x, area.y, &line, area.width);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_row(buf: &Buffer) -> String {
        (0..buf.area.width)
            .map(|x| buf.get(x, 0).symbol().to_string())
            .collect()
    }

    #[test]
    fn shows_thinking_while_generating() {
        let area = Rect::new(0, 0, 30, 1);
        let mut buf = Buffer::empty(area);
        ActivityIndicator::new(SessionState::Generating, "", 2).render(area, &mut buf);
        assert!(first_row(&buf).contains("Thinking..."));
    }

    #[test]
    fn shows_status_while_loading() {
        let area = Rect::new(0, 0, 40, 1);
        let mut buf = Buffer::empty(area);
        ActivityIndicator::new(SessionState::LoadingModel, "Loading model 40%", 0)
            .render(area, &mut buf);
        assert!(first_row(&buf).contains("Loading model 40%"));
    }
}
