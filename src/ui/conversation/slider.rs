use crate::session::TokenSlider;
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    symbols,
    widgets::{LineGauge, Widget},
};

/// Gauge for the max-new-tokens setting
pub struct TokenSliderView<'a> {
    slider: &'a TokenSlider,
}

impl<'a> TokenSliderView<'a> {
    pub fn new(slider: &'a TokenSlider) -> Self {
        Self { slider }
    }

    fn label(&self) -> String {
        format!(
            "Max new tokens: {} ({}-{}) ↑/↓ ",
            self.slider.value(),
            self.slider.min(),
            self.slider.max()
        )
    }
}

impl Widget for TokenSliderView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        LineGauge::default()
            .gauge_style(
                Style::default()
                    .fg(Color::Cyan)
                    .bg(Color::Black)
                    .add_modifier(Modifier::BOLD),
            )
            .line_set(symbols::line::THICK)
            .label(self.label())
            .ratio(self.slider.ratio())
            .render(area, buf);
    }
}
