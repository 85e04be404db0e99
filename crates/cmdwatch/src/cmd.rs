//! Command lifecycle: start, stop, status

use std::fmt;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::{CmdConfig, CmdOptions};
use crate::error::{ProcessError, Result};
use crate::group;
use crate::output::{pump, OutputBuffer, OutputSink, OutputStream};
use crate::status::Status;

/// An external command, run at most once.
///
/// `Cmd` is a handle: clones refer to the same command, and every method is
/// safe to call from any number of tasks at once. [`start`](Self::start)
/// runs the command in a background task; [`status`](Self::status) can be
/// polled at any time, [`stop`](Self::stop) terminates it, and
/// [`done`](Self::done) lets many tasks wait for it to finish.
///
/// ```rust,no_run
/// use cmdwatch::Cmd;
///
/// # #[tokio::main]
/// # async fn main() {
/// let cmd = Cmd::new("echo", ["hello"]);
/// let status = cmd.start().wait().await;
/// assert_eq!(status.stdout, vec!["hello"]);
/// # }
/// ```
#[derive(Clone)]
pub struct Cmd {
    inner: Arc<Inner>,
}

struct Inner {
    config: CmdConfig,
    state: Mutex<State>,
    stdout_rx: Mutex<Option<mpsc::Receiver<String>>>,
    stderr_rx: Mutex<Option<mpsc::Receiver<String>>>,
    done_tx: watch::Sender<bool>,
}

#[derive(Debug, Clone, Copy)]
enum Lifecycle {
    /// `start` not called yet
    NotStarted,
    /// Background task is spawning the process
    Launching,
    Running { started: Instant },
    /// `stop` signaled the process group; waiting for it to exit
    Stopping { started: Instant },
    /// Process exited or never launched. `finalized` once buffered output
    /// has been copied into the status and the buffers released.
    Done { finalized: bool },
}

struct State {
    lifecycle: Lifecycle,
    status: Status,
    stdout: Option<Arc<OutputBuffer>>,
    stderr: Option<Arc<OutputBuffer>>,
    /// Sinks handed to the background task on start
    sinks: Option<(OutputSink, OutputSink)>,
    completion: Option<watch::Receiver<Option<Status>>>,
}

impl Cmd {
    /// Create a command with buffered output and no streaming
    pub fn new<I, S>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::build(CmdConfig::new(name).args(args))
    }

    /// Create a command with the given output options.
    ///
    /// A zero `stream_channel_size` is raised to 1; use
    /// [`from_config`](Self::from_config) to reject invalid options instead.
    pub fn with_options<I, S>(options: CmdOptions, name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::build(CmdConfig::new(name).args(args).options(options))
    }

    /// Create a command from a full configuration
    pub fn from_config(config: CmdConfig) -> Result<Self> {
        config.options.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: CmdConfig) -> Self {
        let options = &config.options;

        let (stdout, stderr) = if options.buffered {
            (
                Some(Arc::new(OutputBuffer::new())),
                Some(Arc::new(OutputBuffer::new())),
            )
        } else {
            (None, None)
        };
        let mut stdout_sink = OutputSink::new(stdout.clone(), None);
        let mut stderr_sink = OutputSink::new(stderr.clone(), None);

        let (mut stdout_rx, mut stderr_rx) = (None, None);
        if options.streaming {
            let capacity = options.stream_channel_size.max(1);
            for (sink, rx) in [
                (&mut stdout_sink, &mut stdout_rx),
                (&mut stderr_sink, &mut stderr_rx),
            ] {
                let (tx, lines) = mpsc::channel(capacity);
                let mut stream = OutputStream::new(tx);
                stream.set_buffer_size(options.line_buffer_size);
                sink.stream = Some(stream);
                *rx = Some(lines);
            }
        }

        let (done_tx, _) = watch::channel(false);
        let state = State {
            lifecycle: Lifecycle::NotStarted,
            status: Status::new(config.name.clone()),
            stdout,
            stderr,
            sinks: Some((stdout_sink, stderr_sink)),
            completion: None,
        };

        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(state),
                stdout_rx: Mutex::new(stdout_rx),
                stderr_rx: Mutex::new(stderr_rx),
                done_tx,
            }),
        }
    }

    /// A new, unstarted command with the same configuration.
    ///
    /// A `Cmd` cannot be run twice; use this to run it again.
    pub fn fresh(&self) -> Self {
        Self::build(self.inner.config.clone())
    }

    /// Command name
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Command arguments
    pub fn args(&self) -> &[String] {
        &self.inner.config.args
    }

    /// Command configuration
    pub fn config(&self) -> &CmdConfig {
        &self.inner.config
    }

    /// Start the command and return a handle on its final status.
    ///
    /// Does not wait for the command. Idempotent: later calls return a handle
    /// on the same completion channel and never spawn a second process.
    ///
    /// # Panics
    ///
    /// The first call panics if not made from within a tokio runtime.
    pub fn start(&self) -> Completion {
        let mut state = self.inner.state.lock();

        if let Some(rx) = &state.completion {
            return Completion {
                rx: rx.clone(),
                cmd: self.clone(),
            };
        }

        let (tx, rx) = watch::channel(None);
        state.completion = Some(rx.clone());
        state.lifecycle = Lifecycle::Launching;
        let sinks = state.sinks.take().unwrap_or_default();
        drop(state);

        tokio::spawn(run(Arc::clone(&self.inner), sinks, tx));

        Completion {
            rx,
            cmd: self.clone(),
        }
    }

    /// Stop the command by sending its process group SIGTERM.
    ///
    /// Does nothing if the command has not started or has finished. The
    /// final status reports `complete == false`. Safe to call repeatedly.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.inner.state.lock();

        let started = match state.lifecycle {
            Lifecycle::Running { started } | Lifecycle::Stopping { started } => started,
            _ => return Ok(()),
        };

        state.lifecycle = Lifecycle::Stopping { started };
        let pid = state.status.pid;
        debug!(pid = %pid, command = %self.inner.config.name, "Stopping command");

        // Signal the group, not just the child, so its children exit too and
        // release the output pipes.
        group::terminate(pid)
    }

    /// Current status.
    ///
    /// Before start this is the default status. While running, `runtime` is
    /// live and buffered output holds every line written so far, so callers
    /// tail it themselves. After the command finishes, the status is final.
    pub fn status(&self) -> Status {
        self.inner.snapshot()
    }

    /// Handle that resolves once the command has finished for any reason.
    ///
    /// Unlike [`Completion`], any number of waiters can use it; call
    /// [`status`](Self::status) afterwards for the final status.
    pub fn done(&self) -> Done {
        Done {
            rx: self.inner.done_tx.subscribe(),
        }
    }

    /// Process ID, 0 if not started
    pub fn pid(&self) -> u32 {
        self.inner.state.lock().status.pid
    }

    /// True while the process is running
    pub fn is_running(&self) -> bool {
        matches!(
            self.inner.state.lock().lifecycle,
            Lifecycle::Running { .. } | Lifecycle::Stopping { .. }
        )
    }

    /// Take the stdout line channel. `Some` once, and only when streaming.
    ///
    /// The receiver must keep reading while the command runs; a full channel
    /// stalls the command's output. It yields `None` after the last line once
    /// the command has finished.
    pub fn take_stdout_stream(&self) -> Option<mpsc::Receiver<String>> {
        self.inner.stdout_rx.lock().take()
    }

    /// Take the stderr line channel. See [`take_stdout_stream`](Self::take_stdout_stream).
    pub fn take_stderr_stream(&self) -> Option<mpsc::Receiver<String>> {
        self.inner.stderr_rx.lock().take()
    }
}

impl fmt::Debug for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Cmd")
            .field("name", &self.inner.config.name)
            .field("args", &self.inner.config.args)
            .field("pid", &state.status.pid)
            .field("lifecycle", &state.lifecycle)
            .finish()
    }
}

impl Inner {
    fn snapshot(&self) -> Status {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        match state.lifecycle {
            Lifecycle::NotStarted | Lifecycle::Launching => {}
            Lifecycle::Running { started } | Lifecycle::Stopping { started } => {
                state.status.runtime = started.elapsed();
                if let Some(buf) = &state.stdout {
                    state.status.stdout = buf.lines();
                }
                if let Some(buf) = &state.stderr {
                    state.status.stderr = buf.lines();
                }
            }
            Lifecycle::Done { finalized: false } => {
                if let Some(buf) = state.stdout.take() {
                    state.status.stdout = buf.final_lines();
                }
                if let Some(buf) = state.stderr.take() {
                    state.status.stderr = buf.final_lines();
                }
                state.lifecycle = Lifecycle::Done { finalized: true };
            }
            Lifecycle::Done { finalized: true } => {}
        }

        state.status.clone()
    }

    fn launch_failed(&self, err: io::Error, at: DateTime<Utc>) {
        let mut state = self.state.lock();
        state.status.error = Some(ProcessError::spawn(self.config.name.clone(), err));
        state.status.start_ts = Some(at);
        state.status.stop_ts = Some(at);
        state.stdout = None;
        state.stderr = None;
        state.lifecycle = Lifecycle::Done { finalized: true };
    }

    fn launched(&self, pid: u32, started: Instant, at: DateTime<Utc>) {
        let mut state = self.state.lock();
        state.status.pid = pid;
        state.status.start_ts = Some(at);
        state.lifecycle = Lifecycle::Running { started };
    }

    fn exited(
        &self,
        waited: io::Result<ExitStatus>,
        output_error: Option<ProcessError>,
        started: Instant,
    ) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let stopped = matches!(state.lifecycle, Lifecycle::Stopping { .. });
        let status = &mut state.status;

        match waited {
            Ok(exit) => match (exit.code(), exit_signal(&exit)) {
                (Some(code), _) => {
                    status.exit = code;
                    status.complete = !stopped && output_error.is_none();
                    status.error = output_error;
                }
                (None, Some(signal)) => {
                    status.exit = -1;
                    status.complete = false;
                    status.error = Some(ProcessError::Signaled {
                        signal,
                        name: group::signal_name(signal),
                    });
                }
                (None, None) => {
                    status.exit = -1;
                    status.complete = false;
                    status.error = output_error;
                }
            },
            Err(e) => {
                status.exit = -1;
                status.complete = false;
                status.error = Some(ProcessError::Wait(Arc::new(e)));
            }
        }

        status.stop_ts = Some(Utc::now());
        status.runtime = started.elapsed();
        state.lifecycle = Lifecycle::Done { finalized: false };
    }

    /// Send the final status, then wake `done` waiters
    fn publish(&self, completion: &watch::Sender<Option<Status>>) {
        let status = self.snapshot();
        info!(
            command = %status.cmd,
            pid = %status.pid,
            exit = status.exit,
            complete = status.complete,
            error = ?status.error.as_ref().map(ToString::to_string),
            "Command finished"
        );
        completion.send_replace(Some(status));
        self.done_tx.send_replace(true);
    }
}

/// The one task that owns the child process
async fn run(
    inner: Arc<Inner>,
    (stdout_sink, stderr_sink): (OutputSink, OutputSink),
    completion: watch::Sender<Option<Status>>,
) {
    let config = &inner.config;
    debug!(command = %config.name, args = ?config.args, "Starting command");

    let mut cmd = std::process::Command::new(&config.name);
    cmd.args(&config.args);
    if let Some(dir) = &config.dir {
        cmd.current_dir(dir);
    }
    if let Some(env) = &config.env {
        cmd.env_clear();
        cmd.envs(env);
    }
    group::configure(&mut cmd);

    cmd.stdin(Stdio::null());
    cmd.stdout(pipe_or_null(&stdout_sink));
    cmd.stderr(pipe_or_null(&stderr_sink));

    let mut cmd = tokio::process::Command::from(cmd);
    let launched_at = Utc::now();
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(command = %config.name, error = %e, "Failed to start command");
            inner.launch_failed(e, launched_at);
            inner.publish(&completion);
            return;
        }
    };

    let started = Instant::now();
    let pid = child.id().unwrap_or(0);
    inner.launched(pid, started, launched_at);
    info!(pid = %pid, command = %config.name, "Command started");

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (waited, stdout_err, stderr_err) = tokio::join!(
        child.wait(),
        drain(stdout, stdout_sink, "stdout"),
        drain(stderr, stderr_sink, "stderr"),
    );

    inner.exited(waited, stdout_err.or(stderr_err), started);
    inner.publish(&completion);
}

fn pipe_or_null(sink: &OutputSink) -> Stdio {
    if sink.is_empty() {
        Stdio::null()
    } else {
        Stdio::piped()
    }
}

async fn drain<R>(pipe: Option<R>, sink: OutputSink, label: &'static str) -> Option<ProcessError>
where
    R: AsyncRead + Unpin,
{
    match pipe {
        Some(pipe) => pump(pipe, sink, label).await,
        None => None,
    }
}

fn exit_signal(status: &ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    }

    #[cfg(not(unix))]
    {
        let _ = status;
        None
    }
}

/// Final status of a started [`Cmd`].
///
/// Every handle returned by [`Cmd::start`] refers to the same channel and
/// resolves to the same status.
#[derive(Debug, Clone)]
pub struct Completion {
    rx: watch::Receiver<Option<Status>>,
    cmd: Cmd,
}

impl Completion {
    /// Wait for the command to finish and return its final status
    pub async fn wait(mut self) -> Status {
        match self.rx.wait_for(Option::is_some).await {
            Ok(status) => status.clone().unwrap_or_else(|| self.cmd.status()),
            // Background task gone without publishing (runtime shut down)
            Err(_) => self.cmd.status(),
        }
    }

    /// Final status if the command has finished, without waiting
    pub fn try_status(&self) -> Option<Status> {
        self.rx.borrow().clone()
    }

    /// True if both handles come from the same [`Cmd::start`] channel
    pub fn same_channel(&self, other: &Self) -> bool {
        self.rx.same_channel(&other.rx)
    }
}

/// Signal that a [`Cmd`] has finished. Clone freely; nothing is consumed.
#[derive(Debug, Clone)]
pub struct Done {
    rx: watch::Receiver<bool>,
}

impl Done {
    /// True once the command has finished
    pub fn is_done(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the command has finished.
    ///
    /// Returns `false` instead if every handle on the command was dropped
    /// before it finished, which only happens when it was never started.
    pub async fn wait(mut self) -> bool {
        self.rx.wait_for(|done| *done).await.is_ok()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_echo_ok() {
        let before = Utc::now();
        let cmd = Cmd::new("echo", ["foo"]);
        let status = cmd.start().wait().await;

        assert_eq!(status.cmd, "echo");
        assert!(status.pid > 0);
        assert!(status.complete);
        assert_eq!(status.exit, 0);
        assert!(status.error.is_none());
        assert_eq!(status.stdout, vec!["foo"]);
        assert!(status.stderr.is_empty());
        assert!(status.start_ts.unwrap() >= before);
        assert!(status.stop_ts.unwrap() >= status.start_ts.unwrap());
        assert!(status.is_success());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_complete() {
        let status = Cmd::new("false", Vec::<String>::new()).start().wait().await;
        assert!(status.complete);
        assert_eq!(status.exit, 1);
        assert!(status.error.is_none());
        assert!(!status.is_success());
    }

    #[tokio::test]
    async fn test_not_started() {
        let cmd = Cmd::new("echo", ["foo"]);
        let status = cmd.status();
        assert_eq!(status.pid, 0);
        assert_eq!(status.exit, -1);
        assert!(!status.complete);
        assert!(status.stdout.is_empty());
        assert!(!cmd.is_running());
        assert!(!cmd.done().is_done());
        assert!(cmd.stop().is_ok());
    }

    #[tokio::test]
    async fn test_not_found() {
        let cmd = Cmd::new("cmd-does-not-exist", Vec::<String>::new());
        let status = cmd.start().wait().await;
        assert_eq!(status.pid, 0);
        assert_eq!(status.exit, -1);
        assert!(!status.complete);
        assert!(matches!(status.error, Some(ProcessError::Spawn { .. })));
        assert!(status.start_ts.is_some());
        assert_eq!(status.start_ts, status.stop_ts);
        assert!(status.stdout.is_empty());
        assert!(cmd.done().is_done());
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let cmd = Cmd::new("sh", ["-c", "echo $$"]);
        let first = cmd.start();
        let second = cmd.start();
        assert!(first.same_channel(&second));

        let a = first.wait().await;
        let b = second.wait().await;
        assert_eq!(a.pid, b.pid);
        // One process, one line of output
        assert_eq!(a.stdout, vec![a.pid.to_string()]);
        assert!(cmd.start().same_channel(&cmd.start()));
    }

    #[tokio::test]
    async fn test_stop_running() {
        let cmd = Cmd::new("sh", ["-c", "echo 1; sleep 5; echo 2"]);
        let completion = cmd.start();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(cmd.is_running());

        cmd.stop().unwrap();
        let status = tokio::time::timeout(Duration::from_secs(2), completion.wait())
            .await
            .expect("stopped command should finish promptly");

        assert!(!status.complete);
        assert_eq!(status.exit, -1);
        assert_eq!(status.error.as_ref().unwrap().to_string(), "signal: terminated");
        assert_eq!(status.stdout, vec!["1"]);

        // Idempotent after the fact
        assert!(cmd.stop().is_ok());
    }

    #[tokio::test]
    async fn test_status_frozen_after_done() {
        let cmd = Cmd::new("printf", ["a\\nb"]);
        let final_status = cmd.start().wait().await;
        assert_eq!(final_status.stdout, vec!["a", "b"]);

        let again = cmd.status();
        assert_eq!(again.stdout, final_status.stdout);
        assert_eq!(again.stop_ts, final_status.stop_ts);
        assert_eq!(again.runtime, final_status.runtime);
    }

    #[tokio::test]
    async fn test_fresh_runs_again() {
        let cmd = Cmd::new("echo", ["again"]);
        let first = cmd.start().wait().await;

        let rerun = cmd.fresh();
        assert_eq!(rerun.status().pid, 0);
        let second = rerun.start().wait().await;
        assert_eq!(second.stdout, vec!["again"]);
        assert_ne!(first.pid, second.pid);
    }

    #[tokio::test]
    async fn test_done_of_dropped_unstarted_cmd() {
        let cmd = Cmd::new("echo", ["never"]);
        let done = cmd.done();
        drop(cmd);
        assert!(!done.is_done());
        assert!(!done.wait().await);
    }

    #[tokio::test]
    async fn test_done_after_finish() {
        let cmd = Cmd::new("echo", ["once"]);
        let done = cmd.done();
        cmd.start().wait().await;
        drop(cmd);
        assert!(done.is_done());
        assert!(done.wait().await);
    }
}
