//! Supervisor tuning and the command lines used to launch external processes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Sample rate the sampler is asked to decode to.
pub const SAMPLE_RATE_HZ: u32 = 44_100;

/// PCM samples per loudness level (0.1s of mono audio).
pub const CHUNK_SAMPLES: usize = 4_410;

/// Capacity of the rolling level buffer.
pub const MAX_SAMPLES: usize = 200;

/// Gain applied to the chunk RMS before clamping to `0.0..=1.0`.
pub const RMS_GAIN: f64 = 2.0;

/// Bytes requested per read from the sampler pipe.
pub const READ_BUFFER_BYTES: usize = 4096;

/// Header carrying the auth token unless configured otherwise.
pub const DEFAULT_AUTH_HEADER: &str = "X-Plex-Token";

/// Program + argument list for one external process.
///
/// Arguments may contain placeholders that are substituted on every spawn:
/// `{url}`, `{token}`, `{header_name}` and `{headers}` (the full
/// `"<name>: <token>\r\n"` header block).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandTemplate {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandTemplate {
    pub fn new<P, I, A>(program: P, args: I) -> Self
    where
        P: Into<String>,
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Default player: plays `url` on the system output, no window, exits at end of stream.
    pub fn default_player() -> Self {
        Self::new(
            "ffplay",
            [
                "-headers", "{headers}", "-nodisp", "-autoexit", "-loglevel", "quiet", "{url}",
            ],
        )
    }

    /// Default sampler: decodes `url` to mono s16le PCM at [`SAMPLE_RATE_HZ`] on stdout.
    pub fn default_sampler() -> Self {
        Self::new(
            "ffmpeg",
            [
                "-headers",
                "{headers}",
                "-i",
                "{url}",
                "-f",
                "s16le",
                "-acodec",
                "pcm_s16le",
                "-ar",
                "44100",
                "-ac",
                "1",
                "-loglevel",
                "error",
                "pipe:1",
            ],
        )
    }

    /// Substitute placeholders for one spawn.
    ///
    /// Each argument is scanned once, so text coming from a substituted value
    /// is never itself expanded.
    pub fn render_args(&self, url: &str, token: &str, header_name: &str) -> Vec<String> {
        let headers = format!("{header_name}: {token}\r\n");
        let substitutions = [
            ("{headers}", headers.as_str()),
            ("{header_name}", header_name),
            ("{token}", token),
            ("{url}", url),
        ];
        self.args
            .iter()
            .map(|arg| expand_placeholders(arg, &substitutions))
            .collect()
    }
}

fn expand_placeholders(template: &str, substitutions: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        rest = &rest[open..];
        match substitutions
            .iter()
            .find(|(placeholder, _)| rest.starts_with(placeholder))
        {
            Some((placeholder, value)) => {
                out.push_str(value);
                rest = &rest[placeholder.len()..];
            }
            None => {
                out.push('{');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Delay policy for sampler respawns that keep failing before producing audio.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Consecutive empty sampler runs that are respawned without delay.
    pub immediate_restarts: u32,
    /// First delay once the immediate budget is used up; doubles per further failure.
    pub base_delay: Duration,
    /// Cap for the doubling delay.
    pub max_delay: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            immediate_restarts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RestartPolicy {
    /// Delay before the respawn that follows `empty_streak` consecutive runs without audio.
    pub fn delay_for(&self, empty_streak: u32) -> Duration {
        if empty_streak <= self.immediate_restarts {
            return Duration::ZERO;
        }
        let exp = (empty_streak - self.immediate_restarts - 1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

/// Supervisor configuration.
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    pub player: CommandTemplate,
    pub sampler: CommandTemplate,
    /// Request header name the token is sent under.
    pub auth_header: String,
    /// Time processes get to exit after a graceful termination signal.
    pub stop_grace: Duration,
    /// Poll interval while waiting out `stop_grace`.
    pub stop_poll: Duration,
    /// Upper bound `stop` waits for the worker thread.
    pub worker_join_timeout: Duration,
    /// Worker sleep when the pipe has no data.
    pub idle_poll: Duration,
    /// Worker sleep after an unexpected read error.
    pub read_error_backoff: Duration,
    pub restart: RestartPolicy,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            player: CommandTemplate::default_player(),
            sampler: CommandTemplate::default_sampler(),
            auth_header: DEFAULT_AUTH_HEADER.to_string(),
            stop_grace: Duration::from_secs(2),
            stop_poll: Duration::from_millis(100),
            worker_join_timeout: Duration::from_secs(1),
            idle_poll: Duration::from_millis(50),
            read_error_backoff: Duration::from_millis(100),
            restart: RestartPolicy::default(),
        }
    }
}

impl SupervisorConfig {
    pub fn with_player(mut self, player: CommandTemplate) -> Self {
        self.player = player;
        self
    }

    pub fn with_sampler(mut self, sampler: CommandTemplate) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_auth_header(mut self, name: impl Into<String>) -> Self {
        self.auth_header = name.into();
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn with_worker_join_timeout(mut self, timeout: Duration) -> Self {
        self.worker_join_timeout = timeout;
        self
    }

    pub fn with_idle_poll(mut self, poll: Duration) -> Self {
        self.idle_poll = poll;
        self
    }

    pub fn with_restart_policy(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }
}
