//! Error types for the engine bridge

use std::time::Duration;
use thiserror::Error;

pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Error, Debug)]
pub enum BridgeError {
    /// Pipe or descriptor creation failed (e.g. descriptor limit reached).
    #[error("failed to create engine channel: {0}")]
    ResourceExhausted(#[source] std::io::Error),

    /// The engine's own static initialization reported failure.
    #[error("engine {engine} failed to initialize: {reason}")]
    Initialization { engine: String, reason: String },

    /// The engine side of the channel is closed.
    #[error("engine channel is closed")]
    BrokenPipe,

    #[error("IO error: {0}")]
    Io(#[source] std::io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Another engine currently owns the process standard streams.
    #[error("process stdio is already redirected to another engine")]
    StdioBusy,

    #[error("failed to redirect process stdio: {0}")]
    Redirect(#[source] std::io::Error),

    #[error("engine has already been started")]
    AlreadyStarted,

    #[error("engine has not been started")]
    NotStarted,

    #[error("engine thread error: {0}")]
    EngineThread(String),
}

impl BridgeError {
    /// Classify an I/O error from one of the outside pipe ends.
    pub(crate) fn from_pipe_io(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::BrokenPipe {
            Self::BrokenPipe
        } else {
            Self::Io(err)
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
            ),
            Self::Timeout(_) => true,
            _ => false,
        }
    }
}
