//! Command status snapshots

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::error::ProcessError;

/// Running status and consolidated result of a [`Cmd`](crate::Cmd).
///
/// A `Status` is a copy; it does not change after it is returned. Call
/// [`Cmd::status`](crate::Cmd::status) again for a newer one.
///
/// `start_ts` is set once the command has started and `stop_ts` once it has
/// stopped. A command that succeeded (presuming it exits zero on success)
/// ends with `error == None`, `complete == true` and `exit == 0`.
///
/// Check `error` first: if set, the command either never ran or was
/// terminated. `complete` is false if the command was stopped or signaled;
/// a nonzero exit on its own still counts as complete.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    /// Command name
    pub cmd: String,
    /// Process ID, 0 until started
    pub pid: u32,
    /// Ran to completion without being stopped or signaled
    pub complete: bool,
    /// Exit code, -1 if unknown or signaled
    pub exit: i32,
    /// Launch, signal or I/O error
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<ProcessError>,
    /// When the command started
    pub start_ts: Option<DateTime<Utc>>,
    /// When the command stopped
    pub stop_ts: Option<DateTime<Utc>>,
    /// Time running; live while running, final once stopped
    #[serde(serialize_with = "serialize_secs")]
    pub runtime: Duration,
    /// Buffered stdout lines
    pub stdout: Vec<String>,
    /// Buffered stderr lines
    pub stderr: Vec<String>,
}

impl Status {
    /// Status of a command that has not started
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            pid: 0,
            complete: false,
            exit: -1,
            error: None,
            start_ts: None,
            stop_ts: None,
            runtime: Duration::ZERO,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    /// Completed, exited zero, no error
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.complete && self.exit == 0
    }

    /// Runtime in seconds
    pub fn runtime_secs(&self) -> f64 {
        self.runtime.as_secs_f64()
    }

    /// Wall-clock time between start and stop, if both are set
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        Some(self.stop_ts? - self.start_ts?)
    }
}

fn serialize_error<S: Serializer>(
    error: &Option<ProcessError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

fn serialize_secs<S: Serializer>(runtime: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(runtime.as_secs_f64())
}
