use std::path::PathBuf;

use clap::Parser;
use wavetap_types::WaveformStyle;

use crate::config::CliConfig;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "wavetap", version = VERSION)]
pub struct Args {
    /// Playable stream URL, e.g. https://server:32400/library/parts/1/file.flac
    pub url: String,

    /// Auth token injected as a request header
    #[arg(long, env = "WAVETAP_TOKEN", hide_env_values = true)]
    pub token: String,

    /// Config file (defaults to wavetap.toml next to the executable)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Header name carrying the token
    #[arg(long)]
    pub auth_header: Option<String>,

    /// Waveform style: mirrored, line, bars or filled
    #[arg(long, value_parser = parse_style)]
    pub style: Option<WaveformStyle>,

    /// UI frame interval in milliseconds
    #[arg(long)]
    pub refresh_ms: Option<u64>,

    /// Also write logs to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Args {
    /// Command-line flags win over the config file.
    pub fn apply_overrides(&self, cfg: &mut CliConfig) {
        if let Some(header) = self.auth_header.clone() {
            cfg.auth_header = Some(header);
        }
        if let Some(style) = self.style {
            cfg.waveform_style = Some(style);
        }
        if let Some(ms) = self.refresh_ms {
            cfg.refresh_rate_ms = Some(ms);
        }
    }
}

fn parse_style(raw: &str) -> Result<WaveformStyle, String> {
    WaveformStyle::ALL
        .into_iter()
        .find(|style| style.label().eq_ignore_ascii_case(raw.trim()))
        .ok_or_else(|| format!("unknown style {raw:?} (mirrored, line, bars, filled)"))
}
