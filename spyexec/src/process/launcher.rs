//! Spawns the target in its own process group with inherited stdio.
//!
//! The [`tokio::process::Child`] is handed to a reaper task right after
//! spawn. The reaper owns `wait()` and publishes the exit status exactly
//! once, so SIGCHLD is consumed by tokio and never reaches the supervisor
//! as an event of its own.

#![allow(unsafe_code)] // killpg() requires unsafe

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, SystemTime};

use log::{debug, info, warn};
use tokio::process::Command;
use tokio::sync::oneshot;

use crate::domain::{ExecError, Pid};

use super::liveness::{probe, Fingerprint, Liveness};

/// Resolves once with the target's exit status.
pub type ExitNotice = oneshot::Receiver<io::Result<ExitStatus>>;

/// How the supervisor learns that the target exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitDetection {
    /// Direct child-exit notification, backed by process-table polling
    #[default]
    Wait,
    /// Process-table polling only
    Poll,
}

/// A spawned, running target.
#[derive(Debug)]
pub struct TargetProcess {
    pid: Pid,
    pgid: Pid,
    started_at: SystemTime,
    fingerprint: Fingerprint,
    detection: ExitDetection,
    exit_notice: Option<ExitNotice>,
    finished: bool,
}

/// Spawn `args[0]` with `args[1..]`. Must be called inside a tokio runtime.
///
/// # Errors
/// - [`ExecError::NoArguments`] when `args` is empty
/// - [`ExecError::Spawn`] with the OS error when the process cannot be created
pub fn spawn(args: &[String], detection: ExitDetection) -> Result<TargetProcess, ExecError> {
    let (program, rest) = args.split_first().ok_or(ExecError::NoArguments)?;

    let mut cmd = Command::new(program);
    cmd.args(rest)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        // A new group led by the child: pgid == pid
        .process_group(0)
        .kill_on_drop(false);

    let mut child = cmd.spawn().map_err(ExecError::Spawn)?;
    let started_at = SystemTime::now();
    let raw_pid = child.id().ok_or_else(|| {
        ExecError::Spawn(io::Error::other("spawned child has no pid"))
    })?;
    let pid = Pid::from(raw_pid);
    let fingerprint = Fingerprint::capture(pid);
    info!("started {program} ({pid})");

    let (exit_tx, exit_rx) = oneshot::channel();
    tokio::spawn(async move {
        let status = child.wait().await;
        debug!("reaper observed exit of {pid}: {status:?}");
        // The supervisor may have stopped listening
        let _ = exit_tx.send(status);
    });

    Ok(TargetProcess {
        pid,
        pgid: pid,
        started_at,
        fingerprint,
        detection,
        exit_notice: Some(exit_rx),
        finished: false,
    })
}

impl TargetProcess {
    #[must_use]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    #[must_use]
    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    #[must_use]
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    #[must_use]
    pub fn liveness(&self) -> Liveness {
        probe(&self.fingerprint)
    }

    /// The exit notification, if the supervisor should listen for it.
    ///
    /// Under [`ExitDetection::Poll`] the notice stays here and is only used
    /// by [`TargetProcess::reap`].
    pub fn take_exit_notice(&mut self) -> Option<ExitNotice> {
        match self.detection {
            ExitDetection::Wait => self.exit_notice.take(),
            ExitDetection::Poll => None,
        }
    }

    /// SIGKILL the whole process group. An already empty group is not an error.
    ///
    /// # Errors
    /// Returns the OS error from `killpg` other than `ESRCH`.
    pub fn kill_group(&self) -> io::Result<()> {
        kill_group(self.pgid)
    }

    /// Mark the target as handled so dropping it no longer kills the group.
    pub fn mark_finished(&mut self) {
        self.finished = true;
    }

    /// Wait up to `timeout` for the reaper to collect the exit status.
    ///
    /// Returns `None` if the notice was handed out or did not resolve in time.
    pub async fn reap(&mut self, timeout: Duration) -> Option<ExitStatus> {
        let notice = self.exit_notice.take()?;
        await_exit(self.pid, notice, timeout).await
    }
}

/// Wait up to `timeout` on an exit notice.
pub async fn await_exit(pid: Pid, notice: ExitNotice, timeout: Duration) -> Option<ExitStatus> {
    match tokio::time::timeout(timeout, notice).await {
        Ok(Ok(Ok(status))) => Some(status),
        Ok(Ok(Err(e))) => {
            warn!("waiting for {pid} failed: {e}");
            None
        }
        Ok(Err(_)) => None,
        Err(_) => {
            warn!("{pid} was not reaped within {timeout:?}");
            None
        }
    }
}

impl Drop for TargetProcess {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!("killing unsupervised process group of {}", self.pid);
        if let Err(e) = kill_group(self.pgid) {
            warn!("failed to kill process group {}: {e}", self.pgid.as_raw());
        }
    }
}

fn kill_group(pgid: Pid) -> io::Result<()> {
    if unsafe { libc::killpg(pgid.as_raw(), libc::SIGKILL) } == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn test_spawn_requires_arguments() {
        assert!(matches!(spawn(&[], ExitDetection::Wait), Err(ExecError::NoArguments)));
    }

    #[tokio::test]
    async fn test_spawn_error_is_propagated() {
        let err = spawn(&args(&["/nonexistent/path/to/binary"]), ExitDetection::Wait).unwrap_err();
        let ExecError::Spawn(io) = err else {
            panic!("expected spawn error, got {err:?}");
        };
        assert_eq!(io.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_spawned_process_leads_its_own_group() {
        let mut target = spawn(&args(&["sleep", "5"]), ExitDetection::Wait).unwrap();
        let raw = target.pid().as_raw();
        let pgid = unsafe { libc::getpgid(raw) };
        assert_eq!(pgid, raw);
        assert_ne!(pgid, unsafe { libc::getpgrp() });

        target.kill_group().unwrap();
        let status = target.reap(Duration::from_secs(5)).await.unwrap();
        assert!(!status.success());
        target.mark_finished();
    }

    #[tokio::test]
    async fn test_exit_notice_delivers_status() {
        let mut target = spawn(&args(&["sh", "-c", "exit 7"]), ExitDetection::Wait).unwrap();
        let notice = target.take_exit_notice().unwrap();
        let status = notice.await.unwrap().unwrap();
        assert_eq!(status.code(), Some(7));
        target.mark_finished();
    }

    #[tokio::test]
    async fn test_poll_detection_keeps_notice() {
        let mut target = spawn(&args(&["true"]), ExitDetection::Poll).unwrap();
        assert!(target.take_exit_notice().is_none());
        assert!(target.reap(Duration::from_secs(5)).await.unwrap().success());
        target.mark_finished();
    }

    #[tokio::test]
    async fn test_drop_kills_unfinished_target() {
        let mut target = spawn(&args(&["sleep", "30"]), ExitDetection::Poll).unwrap();
        let fingerprint = *target.fingerprint();
        let notice = target.exit_notice.take().unwrap();
        drop(target);

        let status = tokio::time::timeout(Duration::from_secs(5), notice).await.unwrap().unwrap();
        assert!(!status.unwrap().success());
        assert!(!probe(&fingerprint).is_alive());
    }
}
