//! Configuration loading and parsing.
//!
//! Every field of `wavetap.toml` is optional and merged over the built-in
//! defaults; command-line flags are applied on top by `main`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use wavetap_player::{CommandTemplate, SupervisorConfig};
use wavetap_types::{WaveformPalette, WaveformStyle};

pub const CONFIG_FILE_NAME: &str = "wavetap.toml";
const DEFAULT_REFRESH_MS: u64 = 100;
const MIN_REFRESH_MS: u64 = 16;
const DEFAULT_MAX_WAVEFORM_POINTS: usize = 200;

/// Top-level CLI configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct CliConfig {
    /// Player command line; `{url}`, `{token}`, `{header_name}`, `{headers}` are substituted.
    pub player: Option<CommandTemplate>,
    /// Sampler command line (must write mono s16le PCM at 44.1kHz to stdout).
    pub sampler: Option<CommandTemplate>,
    /// Request header carrying the token.
    pub auth_header: Option<String>,
    /// UI frame interval in milliseconds.
    pub refresh_rate_ms: Option<u64>,
    pub waveform_style: Option<WaveformStyle>,
    /// Upper bound on waveform columns.
    pub max_waveform_points: Option<usize>,
    pub palette: Option<WaveformPalette>,
    /// Time given to both processes after SIGTERM before they are killed.
    pub stop_grace_ms: Option<u64>,
    /// How long `stop` waits for the sampling worker before leaving it behind.
    pub worker_join_timeout_ms: Option<u64>,
    /// Sampler pipe poll interval while no data is available.
    pub idle_poll_ms: Option<u64>,
}

impl CliConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        Self::parse(&raw).with_context(|| format!("parse config {:?}", path))
    }

    fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str::<CliConfig>(raw)?)
    }

    /// Load `explicit` if given; otherwise `wavetap.toml` next to the
    /// executable when present, else defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }
        match default_config_path() {
            Some(path) if path.is_file() => Ok((Self::load(&path)?, Some(path))),
            _ => Ok((Self::default(), None)),
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        let mut cfg = SupervisorConfig::default();
        if let Some(player) = self.player.clone() {
            cfg = cfg.with_player(player);
        }
        if let Some(sampler) = self.sampler.clone() {
            cfg = cfg.with_sampler(sampler);
        }
        if let Some(header) = self.auth_header.as_deref().filter(|h| !h.trim().is_empty()) {
            cfg = cfg.with_auth_header(header);
        }
        if let Some(ms) = self.stop_grace_ms {
            cfg = cfg.with_stop_grace(Duration::from_millis(ms));
        }
        if let Some(ms) = self.worker_join_timeout_ms {
            cfg = cfg.with_worker_join_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.idle_poll_ms {
            cfg = cfg.with_idle_poll(Duration::from_millis(ms.max(1)));
        }
        cfg
    }

    pub fn refresh_rate(&self) -> Duration {
        let ms = self
            .refresh_rate_ms
            .unwrap_or(DEFAULT_REFRESH_MS)
            .max(MIN_REFRESH_MS);
        Duration::from_millis(ms)
    }

    pub fn style(&self) -> WaveformStyle {
        self.waveform_style.unwrap_or_default()
    }

    pub fn max_waveform_points(&self) -> usize {
        self.max_waveform_points
            .unwrap_or(DEFAULT_MAX_WAVEFORM_POINTS)
            .max(1)
    }

    pub fn palette(&self) -> WaveformPalette {
        self.palette.unwrap_or_default()
    }
}

fn default_config_path() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    Some(exe.parent()?.join(CONFIG_FILE_NAME))
}
