//! Process group handling
//!
//! Every command runs in its own process group so [`terminate`] reaches the
//! command and anything it spawned, without touching this process.
//!
//! - Unix: `setpgid(0, 0)` at spawn, `killpg(pgid, SIGTERM)` to stop
//! - Windows: `CREATE_NEW_PROCESS_GROUP` at spawn, `taskkill /t /f` to stop

use std::process::Command;

use tracing::debug;

use crate::error::{ProcessError, Result};

#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// Put the command in a new process group led by the child
pub(crate) fn configure(cmd: &mut Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }
}

/// Ask the process group led by `pid` to terminate.
///
/// A group that no longer exists is not an error.
pub(crate) fn terminate(pid: u32) -> Result<()> {
    if pid == 0 {
        return Err(ProcessError::KillFailed("pid must be non-zero".to_string()));
    }
    kill_group(pid)
}

#[cfg(unix)]
fn kill_group(pid: u32) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let pgid = i32::try_from(pid)
        .map_err(|_| ProcessError::KillFailed(format!("pid {pid} out of range")))?;
    match killpg(Pid::from_raw(pgid), Signal::SIGTERM) {
        Ok(()) => {
            debug!(pid = %pid, "Sent SIGTERM to process group");
            Ok(())
        }
        Err(Errno::ESRCH) => {
            debug!(pid = %pid, "Process group already gone");
            Ok(())
        }
        Err(e) => Err(ProcessError::KillFailed(e.to_string())),
    }
}

#[cfg(windows)]
fn kill_group(pid: u32) -> Result<()> {
    use std::process::Stdio;

    let status = Command::new("taskkill")
        .args(["/t", "/f", "/pid", &pid.to_string()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| ProcessError::KillFailed(e.to_string()))?;
    if !status.success() {
        return Err(ProcessError::KillFailed(format!(
            "taskkill failed for pid {pid} (exit {:?})",
            status.code()
        )));
    }
    debug!(pid = %pid, "Windows process tree killed");
    Ok(())
}

#[cfg(not(any(unix, windows)))]
fn kill_group(pid: u32) -> Result<()> {
    Err(ProcessError::KillFailed(format!(
        "cannot signal pid {pid} on this platform"
    )))
}

/// Description of a signal number, as shells print it
#[cfg(unix)]
pub(crate) fn signal_name(signal: i32) -> String {
    use nix::sys::signal::Signal;

    let name = match Signal::try_from(signal) {
        Ok(Signal::SIGHUP) => "hangup",
        Ok(Signal::SIGINT) => "interrupt",
        Ok(Signal::SIGQUIT) => "quit",
        Ok(Signal::SIGILL) => "illegal instruction",
        Ok(Signal::SIGTRAP) => "trace/breakpoint trap",
        Ok(Signal::SIGABRT) => "aborted",
        Ok(Signal::SIGBUS) => "bus error",
        Ok(Signal::SIGFPE) => "floating point exception",
        Ok(Signal::SIGKILL) => "killed",
        Ok(Signal::SIGUSR1) => "user defined signal 1",
        Ok(Signal::SIGSEGV) => "segmentation fault",
        Ok(Signal::SIGUSR2) => "user defined signal 2",
        Ok(Signal::SIGPIPE) => "broken pipe",
        Ok(Signal::SIGALRM) => "alarm clock",
        Ok(Signal::SIGTERM) => "terminated",
        Ok(other) => return other.as_str().to_string(),
        Err(_) => return format!("signal {signal}"),
    };
    name.to_string()
}

/// Description of a signal number, as shells print it
#[cfg(not(unix))]
pub(crate) fn signal_name(signal: i32) -> String {
    format!("signal {signal}")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_signal_names() {
        assert_eq!(signal_name(15), "terminated");
        assert_eq!(signal_name(9), "killed");
        assert_eq!(signal_name(2), "interrupt");
        assert_eq!(signal_name(10_000), "signal 10000");
    }

    #[test]
    fn test_terminate_rejects_zero_pid() {
        assert!(matches!(terminate(0), Err(ProcessError::KillFailed(_))));
    }

    #[test]
    fn test_terminate_missing_group_is_ok() {
        // A fresh group leader that has already been reaped
        let mut cmd = Command::new("true");
        configure(&mut cmd);
        let mut child = cmd.spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(terminate(pid).is_ok());
    }
}
