use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use crossterm::{
    event::{self, Event as CEvent, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use wavetap_player::{LevelBuffer, ProcessSupervisor, SessionSnapshot, WaveformRenderer};
use wavetap_types::{SessionState, WaveformPalette, WaveformStyle};

use super::render;

const LOG_CAP: usize = 500;
/// Per-frame decay of the peak marker.
const PEAK_DECAY: f32 = 0.95;

/// What the UI needs beyond the supervisor itself.
pub(crate) struct AppSettings {
    pub(crate) url: String,
    pub(crate) token: String,
    pub(crate) style: WaveformStyle,
    pub(crate) palette: WaveformPalette,
    pub(crate) max_waveform_points: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum KeyOutcome {
    Continue,
    Quit,
}

/// Start playback, then drive the event loop until quit.
/// The session is always stopped before the terminal is restored.
pub(crate) fn run_tui(mut app: App, tick: Duration, quit: Arc<AtomicBool>) -> Result<()> {
    app.start_playback();

    let mut term = init_terminal()?;
    let result = ui_loop(&mut term, &mut app, tick, &quit);

    app.shutdown();
    restore_terminal(&mut term)?;
    result
}

/// In-memory UI state for rendering + interaction.
pub(crate) struct App {
    pub(crate) url: String,
    token: String,
    supervisor: ProcessSupervisor,
    levels: Arc<LevelBuffer>,
    level_cursor: u64,
    pub(crate) renderer: WaveformRenderer,
    pub(crate) max_waveform_points: usize,
    pub(crate) snapshot: SessionSnapshot,
    pub(crate) peak: f32,
    pub(crate) player_running: bool,

    pub(crate) status: String,
    pub(crate) logs_open: bool,
    pub(crate) logs: VecDeque<String>,
    pub(crate) logs_scroll: usize,
    last_status_snapshot: String,
    log_rx: Receiver<String>,
}

impl App {
    pub(crate) fn new(
        settings: AppSettings,
        supervisor: ProcessSupervisor,
        log_rx: Receiver<String>,
    ) -> Self {
        let levels = supervisor.levels();
        let level_cursor = levels.total_pushed();
        let renderer = WaveformRenderer::new(0, 0)
            .with_style(settings.style)
            .with_palette(settings.palette);
        Self {
            url: settings.url,
            token: settings.token,
            snapshot: supervisor.snapshot(),
            supervisor,
            levels,
            level_cursor,
            renderer,
            max_waveform_points: settings.max_waveform_points.max(1),
            peak: 0.0,
            player_running: false,
            status: "Idle".into(),
            logs_open: false,
            logs: VecDeque::new(),
            logs_scroll: 0,
            last_status_snapshot: String::new(),
            log_rx,
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        self.snapshot.state
    }

    fn start_playback(&mut self) {
        self.renderer.clear();
        self.peak = 0.0;
        if self.supervisor.start(&self.url, &self.token) {
            self.player_running = true;
            self.status = format!("Playing {}", self.url);
        } else {
            self.player_running = false;
            self.status = "Start failed (see logs)".into();
        }
        self.refresh_snapshot();
    }

    fn stop_playback(&mut self) {
        if !self.supervisor.is_active() {
            self.status = "Nothing playing".into();
            return;
        }
        self.supervisor.stop();
        self.renderer.clear();
        self.peak = 0.0;
        self.player_running = false;
        self.status = "Stopped".into();
        self.refresh_snapshot();
    }

    fn toggle_pause(&mut self) {
        match self.supervisor.state() {
            SessionState::Paused => {
                if self.supervisor.resume() {
                    self.status = format!("Playing {}", self.url);
                } else {
                    self.status = "Resume failed".into();
                }
            }
            SessionState::Running => {
                if self.supervisor.pause() {
                    self.status = "Paused".into();
                } else {
                    self.status = "Pause failed".into();
                }
            }
            _ => self.status = "Nothing playing".into(),
        }
        self.refresh_snapshot();
    }

    fn cycle_style(&mut self) {
        let next = self.renderer.style().next();
        self.renderer.set_style(next);
        self.status = format!("Waveform: {}", next.label());
    }

    fn refresh_snapshot(&mut self) {
        self.snapshot = self.supervisor.snapshot();
    }

    /// Once per frame: pull new levels in one batch, observe the player,
    /// collect log lines.
    pub(crate) fn pump(&mut self) {
        self.drain_logs();

        if self.supervisor.is_active() {
            let was_running = self.player_running;
            self.player_running = self.supervisor.poll_player();
            if was_running && !self.player_running {
                self.status = "Playback ended".into();
            }
        }

        let batch = self.levels.since(self.level_cursor);
        self.level_cursor = batch.cursor;
        self.renderer.add_samples_batch(&batch.levels);
        self.peak = (self.peak * PEAK_DECAY).max(self.levels.get_current());

        self.refresh_snapshot();
        self.note_status_change();
    }

    pub(crate) fn handle_key(&mut self, key: KeyEvent) -> KeyOutcome {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return KeyOutcome::Quit;
        }
        if self.logs_open {
            match key.code {
                KeyCode::Char('q') => return KeyOutcome::Quit,
                KeyCode::Esc | KeyCode::Char('l') => self.toggle_logs(),
                KeyCode::Up => self.scroll_logs_up(),
                KeyCode::Down => self.scroll_logs_down(),
                _ => {}
            }
            return KeyOutcome::Continue;
        }
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return KeyOutcome::Quit,
            KeyCode::Char(' ') => self.toggle_pause(),
            KeyCode::Char('s') => self.stop_playback(),
            KeyCode::Char('p') => self.start_playback(),
            KeyCode::Char('w') => self.cycle_style(),
            KeyCode::Char('l') => self.toggle_logs(),
            _ => {}
        }
        KeyOutcome::Continue
    }

    fn shutdown(&mut self) {
        self.supervisor.stop();
    }

    fn toggle_logs(&mut self) {
        self.logs_open = !self.logs_open;
        if !self.logs_open {
            self.logs_scroll = 0;
        }
    }

    fn scroll_logs_up(&mut self) {
        let max = self.logs.len().saturating_sub(1);
        self.logs_scroll = (self.logs_scroll + 1).min(max);
    }

    fn scroll_logs_down(&mut self) {
        self.logs_scroll = self.logs_scroll.saturating_sub(1);
    }

    fn push_log_line(&mut self, line: String) {
        if self.logs.len() >= LOG_CAP {
            self.logs.pop_front();
        }
        self.logs.push_back(line);
    }

    fn note_status_change(&mut self) {
        if self.last_status_snapshot == self.status {
            return;
        }
        let line = self.status.clone();
        self.last_status_snapshot = self.status.clone();
        self.push_log_line(line);
    }

    fn drain_logs(&mut self) {
        while let Ok(line) = self.log_rx.try_recv() {
            self.push_log_line(line);
        }
    }
}

fn ui_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    tick: Duration,
    quit: &AtomicBool,
) -> Result<()> {
    let mut last_tick = Instant::now();

    loop {
        if quit.load(Ordering::SeqCst) {
            tracing::info!("quit requested by signal");
            return Ok(());
        }

        app.pump();
        terminal.draw(|f| render::draw(f, app))?;

        let timeout = tick.saturating_sub(last_tick.elapsed());
        if event::poll(timeout).context("poll terminal events")? {
            if let CEvent::Key(k) = event::read().context("read terminal event")? {
                if app.handle_key(k) == KeyOutcome::Quit {
                    return Ok(());
                }
            }
        }
        if last_tick.elapsed() >= tick {
            last_tick = Instant::now();
        }
    }
}

fn init_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("enter alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend).context("create terminal")?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{Sender, unbounded};

    fn key(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE)
    }

    fn idle_app() -> (App, Sender<String>) {
        let (log_tx, log_rx) = unbounded::<String>();
        let settings = AppSettings {
            url: "https://server/track.mp3".into(),
            token: "tok123".into(),
            style: WaveformStyle::Mirrored,
            palette: WaveformPalette::default(),
            max_waveform_points: 200,
        };
        let mut app = App::new(settings, ProcessSupervisor::default(), log_rx);
        app.renderer.set_size(10, 2);
        app.renderer.clear();
        (app, log_tx)
    }

    #[test]
    fn pump_feeds_each_level_to_the_renderer_once() {
        let (mut app, _log_tx) = idle_app();
        let levels = app.levels.clone();
        levels.push(0.5);
        levels.push(1.0);

        app.pump();
        assert_eq!(app.renderer.level_at(9, 9), 1.0);
        let len = app.renderer.history_len();
        app.pump();
        assert_eq!(app.renderer.history_len(), len);
        assert_eq!(app.peak, 1.0);
    }

    #[test]
    fn peak_decays_between_frames() {
        let (mut app, _log_tx) = idle_app();
        app.levels.push(1.0);
        app.pump();
        app.levels.clear();
        app.pump();
        assert!((app.peak - PEAK_DECAY).abs() < 1e-6);
    }

    #[test]
    fn style_key_cycles_renderer_style() {
        let (mut app, _log_tx) = idle_app();
        assert_eq!(app.handle_key(key('w')), KeyOutcome::Continue);
        assert_eq!(app.renderer.style(), WaveformStyle::Line);
        assert_eq!(app.status, "Waveform: line");
    }

    #[test]
    fn pause_and_stop_without_session_only_update_status() {
        let (mut app, _log_tx) = idle_app();
        app.handle_key(key(' '));
        assert_eq!(app.status, "Nothing playing");
        app.handle_key(key('s'));
        assert_eq!(app.status, "Nothing playing");
        assert_eq!(app.state(), SessionState::Idle);
    }

    #[test]
    fn log_panel_captures_keys_until_closed() {
        let (mut app, _log_tx) = idle_app();
        app.handle_key(key('l'));
        assert!(app.logs_open);
        // 'w' is ignored while the panel is open.
        app.handle_key(key('w'));
        assert_eq!(app.renderer.style(), WaveformStyle::Mirrored);
        app.handle_key(KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE));
        assert!(!app.logs_open);
    }

    #[test]
    fn quit_keys() {
        let (mut app, _log_tx) = idle_app();
        assert_eq!(app.handle_key(key('q')), KeyOutcome::Quit);
        assert_eq!(
            app.handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            KeyOutcome::Quit
        );
        app.handle_key(key('l'));
        assert_eq!(app.handle_key(key('q')), KeyOutcome::Quit);
    }

    #[test]
    fn log_lines_are_capped() {
        let (mut app, log_tx) = idle_app();
        for i in 0..LOG_CAP + 20 {
            log_tx.send(format!("line {i}")).unwrap();
        }
        app.pump();
        assert_eq!(app.logs.len(), LOG_CAP);
        assert_eq!(app.logs.back().map(String::as_str), Some("Idle"));
    }
}
