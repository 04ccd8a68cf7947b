//! Playback process supervision and loudness sampling.
//!
//! A [`supervisor::ProcessSupervisor`] runs two external processes per session:
//! a player that renders the stream to the audio device and a sampler that decodes
//! the same stream to raw PCM on a pipe. A worker thread turns that PCM into
//! normalized loudness levels ([`levels::LevelBuffer`]) which the UI thread reads
//! once per frame and draws with [`waveform::WaveformRenderer`].

pub mod config;
pub mod error;
pub mod extractor;
pub mod levels;
pub mod process;
pub mod status;
pub mod supervisor;
pub mod waveform;

pub use config::{CommandTemplate, RestartPolicy, SupervisorConfig};
pub use error::{ProcessRole, SupervisorError};
pub use levels::{LevelBatch, LevelBuffer};
pub use status::SessionSnapshot;
pub use supervisor::ProcessSupervisor;
pub use waveform::{WaveformCell, WaveformFrame, WaveformRenderer};
