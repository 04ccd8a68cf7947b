use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::{Color, Style};
use ratatui::widgets::{Block, Borders, Widget};
use wavetap_player::WaveformFrame;
use wavetap_types::Rgb;

pub(crate) fn panel_block(title: &str) -> Block<'_> {
    Block::default().title(title).borders(Borders::ALL)
}

pub(crate) fn rgb(color: Rgb) -> Color {
    Color::Rgb(color.r, color.g, color.b)
}

/// Paints a rendered [`WaveformFrame`] at the top-left of the target area.
/// Cells outside the area are clipped.
pub(crate) struct WaveformView<'a> {
    frame: &'a WaveformFrame,
}

impl<'a> WaveformView<'a> {
    pub(crate) fn new(frame: &'a WaveformFrame) -> Self {
        Self { frame }
    }
}

impl Widget for WaveformView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        for (col, row, cell) in self.frame.iter() {
            let (Ok(dx), Ok(dy)) = (u16::try_from(col), u16::try_from(row)) else {
                continue;
            };
            if dx >= area.width || dy >= area.height {
                continue;
            }
            if let Some(target) = buf.cell_mut((area.x + dx, area.y + dy)) {
                target
                    .set_char(cell.glyph)
                    .set_style(Style::default().fg(rgb(cell.color)));
            }
        }
    }
}
