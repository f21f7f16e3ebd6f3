//! OS-level liveness checks for the supervised target.
//!
//! A bare PID can be recycled by the kernel once the target is reaped, so
//! the probe compares the start time recorded at spawn with the current
//! one and reports a mismatch as [`Liveness::Reused`].

#![allow(unsafe_code)] // kill(pid, 0) requires unsafe

use std::io;
use std::path::Path;

use crate::domain::Pid;

use super::stat::read_stat;

/// Identity of a process: its PID plus the moment it started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub pid: Pid,
    /// `None` when the platform gives no start time; the PID alone is trusted
    pub start_ticks: Option<u64>,
}

impl Fingerprint {
    /// Capture the fingerprint of a freshly spawned process.
    #[must_use]
    pub fn capture(pid: Pid) -> Self {
        let start_ticks = read_stat(Path::new(&pid.proc_path())).ok().map(|s| s.start_ticks);
        Self { pid, start_ticks }
    }
}

/// Outcome of one liveness query.
#[derive(Debug)]
pub enum Liveness {
    Alive,
    /// No such process, or only its zombie entry remains
    Gone,
    /// The PID now belongs to a different process
    Reused,
    /// The process table could not be queried
    Unobservable(io::Error),
}

impl Liveness {
    #[must_use]
    pub fn is_alive(&self) -> bool {
        matches!(self, Liveness::Alive)
    }
}

/// Query the process table for `fingerprint`.
#[must_use]
pub fn probe(fingerprint: &Fingerprint) -> Liveness {
    if cfg!(target_os = "linux") {
        probe_procfs(fingerprint)
    } else {
        probe_signal(fingerprint.pid)
    }
}

fn probe_procfs(fingerprint: &Fingerprint) -> Liveness {
    match read_stat(Path::new(&fingerprint.pid.proc_path())) {
        Ok(stat) if stat.has_exited() => Liveness::Gone,
        Ok(stat) => match fingerprint.start_ticks {
            Some(expected) if expected != stat.start_ticks => Liveness::Reused,
            _ => Liveness::Alive,
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => Liveness::Gone,
        Err(e) => Liveness::Unobservable(e),
    }
}

fn probe_signal(pid: Pid) -> Liveness {
    // Signal 0 performs the existence and permission checks only
    if unsafe { libc::kill(pid.as_raw(), 0) } == 0 {
        return Liveness::Alive;
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) => Liveness::Gone,
        // Exists but belongs to someone else
        Some(libc::EPERM) => Liveness::Alive,
        _ => Liveness::Unobservable(err),
    }
}
