//! Error taxonomy for the supervisor.
//!
//! None of these cross the public control surface: `start`/`pause`/`resume`
//! report a `bool` and everything else is logged and handled locally.

use std::fmt;

use thiserror::Error;

/// Which external process an operation concerns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProcessRole {
    /// Renders the stream to the audio device.
    Player,
    /// Decodes the stream to PCM on a pipe.
    Sampler,
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessRole::Player => f.write_str("player"),
            ProcessRole::Sampler => f.write_str("sampler"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("failed to spawn {role}: {source}")]
    Spawn {
        role: ProcessRole,
        #[source]
        source: std::io::Error,
    },

    #[error("sampler pipe: {0}")]
    Pipe(String),

    #[error("failed to signal {role}: {source}")]
    Signal {
        role: ProcessRole,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to spawn worker thread: {0}")]
    Worker(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_error_names_the_role() {
        let err = SupervisorError::Spawn {
            role: ProcessRole::Sampler,
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        assert_eq!(err.to_string(), "failed to spawn sampler: no such file");
    }
}
