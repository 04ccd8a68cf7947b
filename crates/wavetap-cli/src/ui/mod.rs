//! Ratatui UI loop.
//!
//! Keys:
//! - Space: pause/resume
//! - s: stop
//! - p: start (or restart) the stream
//! - w: cycle waveform style
//! - l: logs (↑/↓ scroll, Esc/l close)
//! - q, Esc, Ctrl+C: quit

mod app;
mod render;
mod widgets;

pub(crate) use app::{App, AppSettings, run_tui};
