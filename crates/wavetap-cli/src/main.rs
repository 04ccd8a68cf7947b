//! `wavetap`: play a stream through an external player and watch its
//! loudness as a live terminal waveform.
//!
//! Keys:
//! - Space: pause/resume
//! - s: stop, p: (re)start
//! - w: cycle waveform style
//! - l: logs
//! - q / Esc: quit

mod cli;
mod config;
mod logging;
mod ui;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, ensure};
use clap::Parser;
use wavetap_player::ProcessSupervisor;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    ensure!(!args.url.trim().is_empty(), "stream URL must not be empty");
    ensure!(!args.token.trim().is_empty(), "token must not be empty");

    let log_rx = logging::init(args.log_file.as_deref())?;
    let (mut cfg, cfg_path) = config::CliConfig::discover(args.config.as_deref())?;
    args.apply_overrides(&mut cfg);
    if let Some(path) = cfg_path {
        tracing::info!(path = %path.display(), "config loaded");
    }

    let quit = Arc::new(AtomicBool::new(false));
    let quit_for_signal = quit.clone();
    let _ = ctrlc::set_handler(move || {
        quit_for_signal.store(true, Ordering::SeqCst);
    });

    let supervisor = ProcessSupervisor::new(cfg.supervisor_config());
    let settings = ui::AppSettings {
        url: args.url,
        token: args.token,
        style: cfg.style(),
        palette: cfg.palette(),
        max_waveform_points: cfg.max_waveform_points(),
    };
    let app = ui::App::new(settings, supervisor, log_rx);
    ui::run_tui(app, cfg.refresh_rate(), quit)
}
