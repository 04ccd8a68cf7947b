use serde::{Deserialize, Serialize};

/// Lifecycle state of a playback session owned by a supervisor.
///
/// `Idle → Starting → Running ⇄ Paused → Stopping → Idle`.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session; processes and worker are gone.
    #[default]
    Idle,
    /// Processes are being spawned.
    Starting,
    /// Player and sampler are running and levels are being produced.
    Running,
    /// Both processes have been sent a stop signal.
    Paused,
    /// Teardown in progress.
    Stopping,
}

impl SessionState {
    /// `true` for every state in which a session exists.
    pub fn is_active(self) -> bool {
        !matches!(self, SessionState::Idle)
    }

    /// Short lowercase label for status lines.
    pub fn label(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Running => "playing",
            SessionState::Paused => "paused",
            SessionState::Stopping => "stopping",
        }
    }
}

/// 24-bit color.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Linear blend toward `other`; `t` is clamped to `0.0..=1.0`.
    pub fn lerp(self, other: Rgb, t: f32) -> Rgb {
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
        let mix = |a: u8, b: u8| -> u8 {
            let v = a as f32 + (b as f32 - a as f32) * t;
            v.round().clamp(0.0, 255.0) as u8
        };
        Rgb {
            r: mix(self.r, other.r),
            g: mix(self.g, other.g),
            b: mix(self.b, other.b),
        }
    }

    /// Scale every channel by `factor` (clamped to `0.0..=1.0`).
    pub fn scaled(self, factor: f32) -> Rgb {
        Rgb::new(0, 0, 0).lerp(self, factor)
    }
}

/// Rendering style for the level waveform.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WaveformStyle {
    /// One dot per column at the level height.
    Line,
    /// Solid bars from the bottom edge.
    Bars,
    /// Bars shaded darker toward their top.
    Filled,
    /// Braille bars mirrored around the vertical center.
    #[default]
    Mirrored,
}

impl WaveformStyle {
    pub const ALL: [WaveformStyle; 4] = [
        WaveformStyle::Mirrored,
        WaveformStyle::Line,
        WaveformStyle::Bars,
        WaveformStyle::Filled,
    ];

    /// Next style in display order, wrapping around.
    pub fn next(self) -> WaveformStyle {
        let idx = Self::ALL.iter().position(|s| *s == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }

    pub fn label(self) -> &'static str {
        match self {
            WaveformStyle::Line => "line",
            WaveformStyle::Bars => "bars",
            WaveformStyle::Filled => "filled",
            WaveformStyle::Mirrored => "mirrored",
        }
    }
}

/// Gradient anchors for level coloring.
///
/// Levels in the lower third blend `low → mid`, the middle third `mid → high`
/// and the top third `high → peak`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WaveformPalette {
    pub low: Rgb,
    pub mid: Rgb,
    pub high: Rgb,
    pub peak: Rgb,
    /// Color for flat/sparse styles that do not use the gradient.
    pub base: Rgb,
}

impl Default for WaveformPalette {
    fn default() -> Self {
        Self {
            low: Rgb::new(100, 200, 255),
            mid: Rgb::new(255, 100, 200),
            high: Rgb::new(255, 200, 100),
            peak: Rgb::new(255, 255, 255),
            base: Rgb::new(100, 200, 255),
        }
    }
}
