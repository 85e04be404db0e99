//! Error types for command execution

use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::output::LineBufferOverflow;

/// Command execution errors
///
/// Errors that happen while the command runs are never returned from
/// [`Cmd`](crate::Cmd) methods; they are recorded in
/// [`Status::error`](crate::Status::error). I/O errors are shared behind an
/// `Arc` so a `Status` carrying one stays cheap to clone.
#[derive(Debug, Clone, Error)]
pub enum ProcessError {
    /// The executable could not be launched (not found, permission denied, ...)
    #[error("Failed to start \"{program}\": {source}")]
    Spawn {
        program: String,
        #[source]
        source: Arc<io::Error>,
    },

    /// Process was terminated by a signal
    #[error("signal: {name}")]
    Signaled { signal: i32, name: String },

    /// Waiting on the process failed
    #[error("Failed waiting for process: {0}")]
    Wait(#[source] Arc<io::Error>),

    /// Reading a stdout/stderr pipe failed
    #[error("Failed reading process output: {0}")]
    Pipe(#[source] Arc<io::Error>),

    /// A streamed line did not fit the line buffer
    #[error(transparent)]
    Output(#[from] LineBufferOverflow),

    /// Failed to signal the process group
    #[error("Failed to kill process: {0}")]
    KillFailed(String),

    /// Invalid configuration
    #[error("Invalid command configuration: {0}")]
    InvalidConfig(String),
}

impl ProcessError {
    pub(crate) fn spawn(program: impl Into<String>, source: io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source: Arc::new(source),
        }
    }

    /// True if the process ended because of a signal
    pub fn is_signal(&self) -> bool {
        matches!(self, Self::Signaled { .. })
    }
}

/// Result type for command operations
pub type Result<T> = std::result::Result<T, ProcessError>;
