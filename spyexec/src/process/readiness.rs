//! Detects when a freshly spawned target is ready to be attached to.
//!
//! The target counts as ready once it has exec'd its own image and its
//! memory map has stopped changing between two consecutive polls.

use std::fs;
use std::time::Duration;

use log::debug;
use tokio::time::Instant;

use super::liveness::{probe, Fingerprint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready(Duration),
    /// Never settled within the timeout; attach anyway
    TimedOut,
    /// The target is gone, there is nothing to attach to
    Exited,
}

/// Poll the target every `poll` until it is ready or `timeout` elapses.
pub async fn wait_until_ready(fingerprint: &Fingerprint, poll: Duration, timeout: Duration) -> Readiness {
    let start = Instant::now();
    let deadline = start + timeout;
    let own_exe = fs::read_link("/proc/self/exe").ok();
    let exe_path = format!("{}/exe", fingerprint.pid.proc_path());
    let maps_path = format!("{}/maps", fingerprint.pid.proc_path());
    let mut previous_maps: Option<usize> = None;

    loop {
        if !probe(fingerprint).is_alive() {
            return Readiness::Exited;
        }

        let execd = match (&own_exe, fs::read_link(&exe_path)) {
            (Some(own), Ok(exe)) => &exe != own,
            // Unreadable exe link: nothing better to go on
            _ => true,
        };

        if execd {
            match fs::read_to_string(&maps_path) {
                Ok(maps) => {
                    let count = maps.lines().count();
                    if previous_maps == Some(count) {
                        return Readiness::Ready(start.elapsed());
                    }
                    previous_maps = Some(count);
                }
                Err(e) => {
                    debug!("cannot read {maps_path}: {e}, treating target as ready");
                    return Readiness::Ready(start.elapsed());
                }
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Readiness::TimedOut;
        }
        tokio::time::sleep(poll.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Pid;

    fn fingerprint_of(child: &tokio::process::Child) -> Fingerprint {
        Fingerprint::capture(Pid::from(child.id().unwrap()))
    }

    #[tokio::test]
    async fn test_sleeping_child_becomes_ready() {
        let mut child = tokio::process::Command::new("sleep").arg("5").spawn().unwrap();
        let fp = fingerprint_of(&child);

        let readiness =
            wait_until_ready(&fp, Duration::from_millis(20), Duration::from_secs(5)).await;
        assert!(matches!(readiness, Readiness::Ready(_)), "got {readiness:?}");

        child.kill().await.unwrap();
    }

    #[tokio::test]
    async fn test_process_that_never_execs_times_out() {
        // Our own image never differs from our own image
        let fp = Fingerprint::capture(Pid::from(std::process::id()));
        let started = Instant::now();

        let readiness =
            wait_until_ready(&fp, Duration::from_millis(20), Duration::from_millis(150)).await;

        assert_eq!(readiness, Readiness::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_exited_child_is_reported() {
        let mut child = tokio::process::Command::new("true").spawn().unwrap();
        let fp = fingerprint_of(&child);
        child.wait().await.unwrap();

        let readiness =
            wait_until_ready(&fp, Duration::from_millis(20), Duration::from_secs(2)).await;
        assert_eq!(readiness, Readiness::Exited);
    }
}
