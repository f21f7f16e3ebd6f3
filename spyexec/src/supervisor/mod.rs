//! Liveness supervisor
//!
//! Races three sources after the session has started:
//! 1. the shutdown token (operator interrupt),
//! 2. the direct exit notice from the reaper, when listening for it,
//! 3. a periodic process-table liveness check.
//!
//! The first to fire ends supervision with a single [`Termination`]. When
//! several are ready at once, shutdown wins, then the exit notice, then
//! the tick. Only the shutdown path kills the target.

pub mod shutdown;

pub use shutdown::{install_signal_hook, ShutdownToken};

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use log::{info, trace, warn};
use tokio::sync::oneshot::error::RecvError;
use tokio::time::{Instant, MissedTickBehavior};

use crate::domain::Pid;
use crate::process::{ExitNotice, Liveness, TargetProcess};

/// What the supervisor needs from the target.
pub trait SupervisedTarget {
    fn pid(&self) -> Pid;
    fn liveness(&self) -> Liveness;
    /// # Errors
    /// The OS error if the process group could not be signalled.
    fn kill_group(&self) -> io::Result<()>;
    fn take_exit_notice(&mut self) -> Option<ExitNotice>;
}

impl SupervisedTarget for TargetProcess {
    fn pid(&self) -> Pid {
        TargetProcess::pid(self)
    }

    fn liveness(&self) -> Liveness {
        TargetProcess::liveness(self)
    }

    fn kill_group(&self) -> io::Result<()> {
        TargetProcess::kill_group(self)
    }

    fn take_exit_notice(&mut self) -> Option<ExitNotice> {
        TargetProcess::take_exit_notice(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationEvent {
    ExternalShutdownRequested,
    ProcessObservedDead,
}

/// The one terminal outcome of a supervision run.
#[derive(Debug)]
pub struct Termination {
    pub event: TerminationEvent,
    /// Known when the exit was observed directly
    pub exit_status: Option<ExitStatus>,
    /// The exit notice, if it had not resolved when supervision ended
    pub pending_exit: Option<ExitNotice>,
}

pub struct LivenessSupervisor {
    shutdown: ShutdownToken,
    interval: Duration,
}

impl LivenessSupervisor {
    #[must_use]
    pub fn new(shutdown: ShutdownToken, interval: Duration) -> Self {
        Self { shutdown, interval }
    }

    /// Block until the target is gone or shutdown is requested.
    ///
    /// Consumes the supervisor: each run ends in exactly one [`Termination`].
    pub async fn run<T: SupervisedTarget>(self, target: &mut T) -> Termination {
        let pid = target.pid();
        let mut notice = target.take_exit_notice();

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let shutdown = self.shutdown.triggered();
        tokio::pin!(shutdown);

        info!("monitoring {pid}, liveness check every {:?}", self.interval);

        loop {
            tokio::select! {
                biased;

                () = &mut shutdown => {
                    info!("shutdown requested, killing process group of {pid}");
                    if let Err(e) = target.kill_group() {
                        warn!("failed to kill process group of {pid}: {e}");
                    }
                    return Termination {
                        event: TerminationEvent::ExternalShutdownRequested,
                        exit_status: None,
                        pending_exit: notice,
                    };
                }

                result = next_exit(&mut notice), if notice.is_some() => match result {
                    Ok(Ok(status)) => {
                        info!("{pid} exited: {status}");
                        return Termination {
                            event: TerminationEvent::ProcessObservedDead,
                            exit_status: Some(status),
                            pending_exit: None,
                        };
                    }
                    Ok(Err(e)) => {
                        warn!("waiting for {pid} failed: {e}, falling back to polling");
                        notice = None;
                    }
                    Err(_) => {
                        warn!("exit notification for {pid} was lost, falling back to polling");
                        notice = None;
                    }
                },

                _ = ticker.tick() => {
                    let liveness = target.liveness();
                    if liveness.is_alive() {
                        trace!("{pid} is alive");
                        continue;
                    }
                    info!("{pid} is no longer running ({liveness:?})");
                    return Termination {
                        event: TerminationEvent::ProcessObservedDead,
                        exit_status: None,
                        pending_exit: notice,
                    };
                }
            }
        }
    }
}

async fn next_exit(notice: &mut Option<ExitNotice>) -> Result<io::Result<ExitStatus>, RecvError> {
    match notice {
        Some(rx) => rx.await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    const INTERVAL: Duration = Duration::from_millis(50);

    #[derive(Default)]
    struct MockTarget {
        alive: AtomicBool,
        probes: AtomicUsize,
        kills: AtomicUsize,
        notice: Option<ExitNotice>,
        /// Probe result once not alive, `Gone` when unset
        dead_as: Option<fn() -> Liveness>,
    }

    impl MockTarget {
        fn alive() -> Self {
            Self { alive: AtomicBool::new(true), ..Self::default() }
        }
    }

    impl SupervisedTarget for MockTarget {
        fn pid(&self) -> Pid {
            Pid(4242)
        }

        fn liveness(&self) -> Liveness {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.alive.load(Ordering::SeqCst) {
                Liveness::Alive
            } else {
                self.dead_as.map_or(Liveness::Gone, |dead| dead())
            }
        }

        fn kill_group(&self) -> io::Result<()> {
            self.kills.fetch_add(1, Ordering::SeqCst);
            self.alive.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn take_exit_notice(&mut self) -> Option<ExitNotice> {
            self.notice.take()
        }
    }

    #[tokio::test]
    async fn test_shutdown_before_first_tick_kills_without_polling() {
        let token = ShutdownToken::new();
        token.trigger();
        let mut target = MockTarget::alive();

        let termination = LivenessSupervisor::new(token, INTERVAL).run(&mut target).await;

        assert_eq!(termination.event, TerminationEvent::ExternalShutdownRequested);
        assert_eq!(target.kills.load(Ordering::SeqCst), 1);
        assert_eq!(target.probes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dead_target_observed_on_next_tick_without_kill() {
        let mut target = MockTarget::default();
        let started = Instant::now();

        let termination = tokio::time::timeout(
            INTERVAL * 4,
            LivenessSupervisor::new(ShutdownToken::new(), INTERVAL).run(&mut target),
        )
        .await
        .unwrap();

        assert_eq!(termination.event, TerminationEvent::ProcessObservedDead);
        assert!(started.elapsed() >= INTERVAL);
        assert_eq!(target.probes.load(Ordering::SeqCst), 1);
        assert_eq!(target.kills.load(Ordering::SeqCst), 0);
    }

    async fn observe_dead_as(dead_as: fn() -> Liveness) -> (Termination, MockTarget) {
        let mut target = MockTarget { dead_as: Some(dead_as), ..MockTarget::default() };
        let termination = tokio::time::timeout(
            INTERVAL * 4,
            LivenessSupervisor::new(ShutdownToken::new(), INTERVAL).run(&mut target),
        )
        .await
        .unwrap();
        (termination, target)
    }

    #[tokio::test]
    async fn test_unobservable_target_counts_as_dead() {
        let (termination, target) =
            observe_dead_as(|| Liveness::Unobservable(io::Error::other("eio"))).await;

        assert_eq!(termination.event, TerminationEvent::ProcessObservedDead);
        assert_eq!(target.probes.load(Ordering::SeqCst), 1);
        assert_eq!(target.kills.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reused_pid_counts_as_dead() {
        let (termination, target) = observe_dead_as(|| Liveness::Reused).await;

        assert_eq!(termination.event, TerminationEvent::ProcessObservedDead);
        assert_eq!(target.probes.load(Ordering::SeqCst), 1);
        assert_eq!(target.kills.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exit_notice_ends_supervision_with_status() {
        let (tx, rx) = oneshot::channel();
        let mut target = MockTarget { notice: Some(rx), ..MockTarget::alive() };
        tx.send(Ok(ExitStatus::from_raw(3 << 8))).unwrap();

        let termination =
            LivenessSupervisor::new(ShutdownToken::new(), Duration::from_secs(60)).run(&mut target).await;

        assert_eq!(termination.event, TerminationEvent::ProcessObservedDead);
        assert_eq!(termination.exit_status.and_then(|s| s.code()), Some(3));
        assert_eq!(target.kills.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_wins_over_ready_exit_notice() {
        let (tx, rx) = oneshot::channel();
        let mut target = MockTarget { notice: Some(rx), ..MockTarget::alive() };
        tx.send(Ok(ExitStatus::from_raw(0))).unwrap();
        let token = ShutdownToken::new();
        token.trigger();

        let termination = LivenessSupervisor::new(token, INTERVAL).run(&mut target).await;

        assert_eq!(termination.event, TerminationEvent::ExternalShutdownRequested);
        assert_eq!(target.kills.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lost_notice_falls_back_to_polling() {
        let (tx, rx) = oneshot::channel::<io::Result<ExitStatus>>();
        drop(tx);
        let mut target = MockTarget { notice: Some(rx), ..MockTarget::alive() };
        let token = ShutdownToken::new();

        let termination = {
            let run = LivenessSupervisor::new(token.clone(), INTERVAL).run(&mut target);
            tokio::pin!(run);

            // Still monitoring after a few ticks
            assert!(tokio::time::timeout(INTERVAL * 3, &mut run).await.is_err());
            token.trigger();
            run.await
        };

        assert_eq!(termination.event, TerminationEvent::ExternalShutdownRequested);
        assert!(target.probes.load(Ordering::SeqCst) >= 1);
        assert_eq!(target.kills.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_during_monitoring() {
        let mut target = MockTarget::alive();
        let token = ShutdownToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(INTERVAL * 2).await;
            trigger.trigger();
        });

        let termination = LivenessSupervisor::new(token, INTERVAL).run(&mut target).await;

        assert_eq!(termination.event, TerminationEvent::ExternalShutdownRequested);
        assert_eq!(target.kills.load(Ordering::SeqCst), 1);
        assert!(termination.exit_status.is_none());
    }
}
