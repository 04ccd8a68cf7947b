use ratatui::{
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Gauge, List, ListItem, Paragraph},
};
use wavetap_player::waveform::level_color;
use wavetap_types::SessionState;

use super::app::App;
use super::widgets::{WaveformView, panel_block, rgb};

pub(crate) fn draw(f: &mut ratatui::Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Min(5),
            Constraint::Length(3),
            Constraint::Length(1),
        ])
        .split(f.area());

    let snap = &app.snapshot;
    let state_style = match snap.state {
        SessionState::Running => Style::default().fg(Color::Green),
        SessionState::Paused => Style::default().fg(Color::Yellow),
        SessionState::Idle => Style::default().fg(Color::DarkGray),
        _ => Style::default().fg(Color::Cyan),
    };
    let player = if !snap.state.is_active() {
        "-"
    } else if app.player_running {
        "running"
    } else {
        "ended"
    };
    let header = vec![
        Line::from(vec![
            Span::styled(
                snap.state.label(),
                state_style.add_modifier(Modifier::BOLD),
            ),
            Span::raw("  "),
            Span::raw(truncate_label(&app.url, chunks[0].width.saturating_sub(16) as usize)),
        ]),
        Line::from(app.status.clone()),
    ];
    f.render_widget(
        Paragraph::new(header).block(panel_block("wavetap")),
        chunks[0],
    );

    let title = format!("Waveform [{}]", app.renderer.style().label());
    let block = panel_block(&title);
    let inner = block.inner(chunks[1]);
    f.render_widget(block, chunks[1]);
    let width = (inner.width as usize).min(app.max_waveform_points);
    let height = inner.height as usize;
    if width != app.renderer.width() || height != app.renderer.height() {
        app.renderer.set_size(width, height);
    }
    let frame = app.renderer.draw();
    f.render_widget(WaveformView::new(&frame), inner);

    let level = app.snapshot.current_level;
    let label = format!(
        "level {:.2}  peak {:.2}  restarts {}  levels {}  player {}",
        level,
        app.peak,
        app.snapshot.sampler_restarts,
        app.snapshot.levels_produced,
        player,
    );
    let gauge = Gauge::default()
        .block(panel_block("Level"))
        .gauge_style(Style::default().fg(rgb(level_color(app.renderer.palette(), level))))
        .ratio(f64::from(level).clamp(0.0, 1.0))
        .label(label);
    f.render_widget(gauge, chunks[2]);

    let keys = "space pause/resume • s stop • p play • w style • l logs • q quit";
    f.render_widget(
        Paragraph::new(keys).style(Style::default().fg(Color::DarkGray)),
        chunks[3],
    );

    if app.logs_open {
        let area = centered_rect(90, 80, f.area());
        f.render_widget(Clear, area);
        let block = Block::default()
            .borders(Borders::ALL)
            .title("Logs (Esc to close, ↑/↓ scroll)");
        let inner = block.inner(area);
        let height = inner.height as usize;
        let total = app.logs.len();
        let end = total.saturating_sub(app.logs_scroll);
        let start = end.saturating_sub(height);
        let mut items = Vec::new();
        for line in app.logs.iter().skip(start).take(end.saturating_sub(start)) {
            items.push(ListItem::new(line.clone()));
        }
        if items.is_empty() {
            items.push(ListItem::new("<no logs>"));
        }
        let list = List::new(items).block(block);
        f.render_widget(list, area);
    }
}

fn truncate_label(label: &str, max: usize) -> String {
    let count = label.chars().count();
    if max == 0 || count <= max {
        return label.to_string();
    }
    if max <= 3 {
        return label.chars().take(max).collect();
    }
    let head: String = label.chars().take(max - 3).collect();
    format!("{head}...")
}

fn centered_rect(percent_x: u16, percent_y: u16, r: ratatui::layout::Rect) -> ratatui::layout::Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1]);
    horizontal[1]
}
