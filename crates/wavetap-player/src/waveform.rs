//! Terminal waveform rendering from loudness levels.
//!
//! The renderer keeps its own short history (up to twice the display width)
//! and produces a [`WaveformFrame`] of glyph cells; drawing those cells onto a
//! terminal is the caller's job.

use std::collections::VecDeque;

use wavetap_types::{Rgb, WaveformPalette, WaveformStyle};

const BRAILLE_BASE: u32 = 0x2800;
/// Dot bits per row of a braille cell, top to bottom.
const BRAILLE_LEFT: [u8; 4] = [0x01, 0x02, 0x04, 0x40];
const BRAILLE_RIGHT: [u8; 4] = [0x08, 0x10, 0x20, 0x80];
const DOTS_PER_ROW: usize = 4;

const LINE_GLYPH: char = '●';
const BAR_GLYPH: char = '█';
const FILLED_GLYPH: char = '▓';

/// One drawn terminal cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaveformCell {
    pub glyph: char,
    pub color: Rgb,
}

/// Rendered output: `height` rows of `width` optional cells, row 0 on top.
/// `None` cells are left untouched by the caller.
#[derive(Clone, Debug, PartialEq)]
pub struct WaveformFrame {
    width: usize,
    height: usize,
    style: WaveformStyle,
    cells: Vec<Option<WaveformCell>>,
}

impl WaveformFrame {
    fn blank(width: usize, height: usize, style: WaveformStyle) -> Self {
        Self {
            width,
            height,
            style,
            cells: vec![None; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn style(&self) -> WaveformStyle {
        self.style
    }

    pub fn get(&self, col: usize, row: usize) -> Option<&WaveformCell> {
        if col >= self.width || row >= self.height {
            return None;
        }
        self.cells[row * self.width + col].as_ref()
    }

    fn set(&mut self, col: usize, row: usize, cell: WaveformCell) {
        if col < self.width && row < self.height {
            self.cells[row * self.width + col] = Some(cell);
        }
    }

    /// Drawn cells as `(col, row, cell)`.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &WaveformCell)> + '_ {
        self.cells.iter().enumerate().filter_map(move |(i, cell)| {
            cell.as_ref()
                .map(|cell| (i % self.width.max(1), i / self.width.max(1), cell))
        })
    }

    /// Glyphs of one row, blanks as spaces.
    pub fn row_text(&self, row: usize) -> String {
        (0..self.width)
            .map(|col| self.get(col, row).map_or(' ', |c| c.glyph))
            .collect()
    }
}

/// Gradient color for a level: three equal bands `low→mid`, `mid→high`,
/// `high→peak`.
pub fn level_color(palette: &WaveformPalette, level: f32) -> Rgb {
    let level = if level.is_finite() { level.clamp(0.0, 1.0) } else { 0.0 };
    const THIRD: f32 = 1.0 / 3.0;
    if level < THIRD {
        palette.low.lerp(palette.mid, level / THIRD)
    } else if level < 2.0 * THIRD {
        palette.mid.lerp(palette.high, (level - THIRD) / THIRD)
    } else {
        palette.high.lerp(palette.peak, (level - 2.0 * THIRD) / THIRD)
    }
}

/// Stateful waveform renderer, owned by the UI thread.
#[derive(Clone, Debug)]
pub struct WaveformRenderer {
    width: usize,
    height: usize,
    style: WaveformStyle,
    palette: WaveformPalette,
    history: VecDeque<f32>,
}

impl WaveformRenderer {
    pub fn new(width: usize, height: usize) -> Self {
        let mut renderer = Self {
            width,
            height,
            style: WaveformStyle::default(),
            palette: WaveformPalette::default(),
            history: VecDeque::with_capacity(width * 2),
        };
        renderer.clear();
        renderer
    }

    pub fn with_style(mut self, style: WaveformStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_palette(mut self, palette: WaveformPalette) -> Self {
        self.palette = palette;
        self
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn style(&self) -> WaveformStyle {
        self.style
    }

    pub fn set_style(&mut self, style: WaveformStyle) {
        self.style = style;
    }

    pub fn palette(&self) -> &WaveformPalette {
        &self.palette
    }

    pub fn set_palette(&mut self, palette: WaveformPalette) {
        self.palette = palette;
    }

    /// Resize the display area. History beyond the new bound is dropped,
    /// oldest first.
    pub fn set_size(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        self.trim();
    }

    pub fn add_sample(&mut self, level: f32) {
        self.history.push_back(clamp_level(level));
        self.trim();
    }

    /// Append a frame's worth of levels in order.
    pub fn add_samples_batch(&mut self, levels: &[f32]) {
        if levels.is_empty() {
            return;
        }
        self.history
            .extend(levels.iter().copied().map(clamp_level));
        self.trim();
    }

    /// Reset to a flat line of `width` silent samples.
    pub fn clear(&mut self) {
        self.history.clear();
        self.history.resize(self.width, 0.0);
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    fn capacity(&self) -> usize {
        self.width.saturating_mul(2)
    }

    fn trim(&mut self) {
        let cap = self.capacity();
        while self.history.len() > cap {
            self.history.pop_front();
        }
    }

    /// Interpolated level at column `index` of a `columns`-wide grid spread
    /// across the whole history.
    pub fn level_at(&self, index: usize, columns: usize) -> f32 {
        let n = self.history.len();
        if n == 0 || columns == 0 {
            return 0.0;
        }
        let pos = index as f32 / columns as f32 * (n - 1) as f32;
        let lo = (pos.floor() as usize).min(n - 1);
        let t = pos - lo as f32;
        match self.history.get(lo + 1) {
            Some(&next) => self.history[lo] * (1.0 - t) + next * t,
            None => self.history[lo],
        }
    }

    pub fn draw(&self) -> WaveformFrame {
        let mut frame = WaveformFrame::blank(self.width, self.height, self.style);
        if self.width == 0 || self.height == 0 {
            return frame;
        }
        match self.style {
            WaveformStyle::Mirrored => self.draw_mirrored(&mut frame),
            WaveformStyle::Line => self.draw_line(&mut frame),
            WaveformStyle::Bars => self.draw_bars(&mut frame),
            WaveformStyle::Filled => self.draw_filled(&mut frame),
        }
        frame
    }

    /// Braille bars mirrored around the vertical center. Each cell's left and
    /// right dot columns sample adjacent points of a `2 * width` grid.
    fn draw_mirrored(&self, frame: &mut WaveformFrame) {
        let total_dots = self.height * DOTS_PER_ROW;
        let mid = (total_dots / 2) as f32;
        let sub_columns = self.width * 2;

        for col in 0..self.width {
            let left = self.level_at(col * 2, sub_columns);
            let right = self.level_at(col * 2 + 1, sub_columns);
            let color = level_color(&self.palette, left.max(right));
            let (left_extent, right_extent) = (left * mid, right * mid);

            for row in 0..self.height {
                let mut pattern = 0u8;
                for dot in 0..DOTS_PER_ROW {
                    let dist = ((row * DOTS_PER_ROW + dot) as f32 - mid).abs();
                    if dist <= left_extent {
                        pattern |= BRAILLE_LEFT[dot];
                    }
                    if dist <= right_extent {
                        pattern |= BRAILLE_RIGHT[dot];
                    }
                }
                if pattern != 0 {
                    frame.set(col, row, WaveformCell {
                        glyph: braille(pattern),
                        color,
                    });
                }
            }
        }
    }

    fn draw_line(&self, frame: &mut WaveformFrame) {
        let top = (self.height - 1) as f32;
        for col in 0..self.width {
            let level = self.level_at(col, self.width);
            let row = self.height - 1 - (level * top) as usize;
            frame.set(col, row, WaveformCell {
                glyph: LINE_GLYPH,
                color: self.palette.base,
            });
        }
    }

    fn draw_bars(&self, frame: &mut WaveformFrame) {
        for col in 0..self.width {
            let bar = self.bar_rows(col);
            for step in 0..bar {
                frame.set(col, self.height - 1 - step, WaveformCell {
                    glyph: BAR_GLYPH,
                    color: self.palette.base,
                });
            }
        }
    }

    /// Like bars, dimming toward the top of each bar.
    fn draw_filled(&self, frame: &mut WaveformFrame) {
        for col in 0..self.width {
            let bar = self.bar_rows(col);
            for step in 0..bar {
                let intensity = 1.0 - step as f32 / bar as f32;
                frame.set(col, self.height - 1 - step, WaveformCell {
                    glyph: FILLED_GLYPH,
                    color: self.palette.base.scaled(intensity),
                });
            }
        }
    }

    fn bar_rows(&self, col: usize) -> usize {
        let level = self.level_at(col, self.width);
        ((level * self.height as f32) as usize).min(self.height)
    }
}

fn clamp_level(level: f32) -> f32 {
    if level.is_nan() { 0.0 } else { level.clamp(0.0, 1.0) }
}

fn braille(pattern: u8) -> char {
    char::from_u32(BRAILLE_BASE + pattern as u32).unwrap_or(' ')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer_with(width: usize, height: usize, history: &[f32]) -> WaveformRenderer {
        let mut r = WaveformRenderer::new(width, height);
        r.history.clear();
        r.add_samples_batch(history);
        r
    }

    #[test]
    fn starts_as_flat_line_of_width_samples() {
        let r = WaveformRenderer::new(10, 3);
        assert_eq!(r.history_len(), 10);
        assert_eq!(r.level_at(5, 10), 0.0);
    }

    #[test]
    fn history_is_bounded_by_twice_the_width() {
        let mut r = WaveformRenderer::new(4, 2);
        r.add_samples_batch(&[0.5; 20]);
        assert_eq!(r.history_len(), 8);
        r.add_sample(1.0);
        assert_eq!(r.history_len(), 8);
        r.set_size(2, 2);
        assert_eq!(r.history_len(), 4);
    }

    #[test]
    fn samples_are_clamped() {
        let r = renderer_with(2, 1, &[-3.0, f32::NAN, 9.0]);
        assert_eq!(r.history, VecDeque::from([0.0, 0.0, 1.0]));
    }

    #[test]
    fn clear_resets_to_silence() {
        let mut r = renderer_with(3, 1, &[1.0, 1.0, 1.0]);
        r.clear();
        assert_eq!(r.history, VecDeque::from([0.0, 0.0, 0.0]));
    }

    #[test]
    fn level_at_interpolates_between_neighbours() {
        let r = renderer_with(2, 1, &[0.0, 1.0]);
        assert_eq!(r.level_at(0, 2), 0.0);
        assert!((r.level_at(1, 2) - 0.5).abs() < 1e-6);
        assert_eq!(renderer_with(2, 1, &[]).level_at(1, 2), 0.0);
    }

    #[test]
    fn full_level_fills_every_braille_dot() {
        let r = renderer_with(3, 1, &[1.0; 6]);
        let frame = r.draw();
        assert_eq!(frame.row_text(0), "⣿⣿⣿");
    }

    #[test]
    fn silence_draws_only_the_center_line() {
        let r = WaveformRenderer::new(2, 2);
        let frame = r.draw();
        assert_eq!(frame.row_text(0), "  ");
        // Dot row 4 of 8 is the first row of the lower cell: dots 1 and 4.
        assert_eq!(frame.row_text(1), "\u{2809}\u{2809}");
    }

    #[test]
    fn braille_halves_sample_adjacent_sub_columns() {
        let r = renderer_with(1, 1, &[0.0, 1.0]);
        let cell = *r.draw().get(0, 0).unwrap();
        // Left column: center dot only. Right column at level 0.5: rows 1..=3.
        let expected = 0x04 | 0x10 | 0x20 | 0x80;
        assert_eq!(cell.glyph, braille(expected));
    }

    #[test]
    fn mirrored_color_follows_the_gradient() {
        let palette = WaveformPalette::default();
        let quiet = WaveformRenderer::new(2, 1).draw();
        assert_eq!(quiet.get(0, 0).unwrap().color, palette.low);
        let loud = renderer_with(2, 1, &[1.0; 4]).draw();
        assert_eq!(loud.get(0, 0).unwrap().color, palette.peak);
    }

    #[test]
    fn gradient_anchors() {
        let p = WaveformPalette::default();
        assert_eq!(level_color(&p, 0.0), p.low);
        assert_eq!(level_color(&p, 1.0 / 3.0), p.mid);
        assert_eq!(level_color(&p, 1.0), p.peak);
        assert_eq!(level_color(&p, -1.0), p.low);
        assert_eq!(level_color(&p, f32::NAN), p.low);
    }

    #[test]
    fn bars_grow_from_the_bottom() {
        let r = renderer_with(2, 4, &[0.5; 4]).with_style(WaveformStyle::Bars);
        let frame = r.draw();
        assert_eq!(frame.row_text(0), "  ");
        assert_eq!(frame.row_text(1), "  ");
        assert_eq!(frame.row_text(2), "██");
        assert_eq!(frame.row_text(3), "██");
    }

    #[test]
    fn filled_bars_fade_toward_the_top() {
        let r = renderer_with(1, 4, &[1.0; 2]).with_style(WaveformStyle::Filled);
        let frame = r.draw();
        let bottom = frame.get(0, 3).unwrap().color;
        let top = frame.get(0, 0).unwrap().color;
        assert_eq!(bottom, r.palette().base);
        assert!(top.b < bottom.b);
        assert_eq!(frame.iter().count(), 4);
    }

    #[test]
    fn line_places_one_dot_per_column() {
        let r = renderer_with(2, 3, &[0.0, 0.0, 1.0, 1.0]).with_style(WaveformStyle::Line);
        let frame = r.draw();
        assert_eq!(frame.iter().count(), 2);
        assert_eq!(frame.get(0, 2).map(|c| c.glyph), Some(LINE_GLYPH));
    }

    #[test]
    fn zero_sized_area_draws_nothing() {
        let r = WaveformRenderer::new(0, 5);
        assert_eq!(r.draw().iter().count(), 0);
        let r = WaveformRenderer::new(5, 0);
        assert_eq!(r.draw().iter().count(), 0);
    }
}
