//! Explicit shutdown token handed to the supervisor
//!
//! The token fires at most once. The process-wide signal hook is just one
//! producer: it triggers the token on Ctrl-C or SIGTERM.

use std::io;
use std::sync::Arc;

use log::{info, warn};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::domain::errors::exit_code;

#[derive(Debug, Clone)]
pub struct ShutdownToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownToken {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    /// Request shutdown. Later calls are no-ops.
    pub fn trigger(&self) {
        self.tx.send_if_modified(|fired| !std::mem::replace(fired, true));
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested, immediately if it already was.
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        // Every token holds the sender, so the channel cannot close while we wait
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

/// What a SIGINT or SIGTERM asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalAction {
    /// Orderly shutdown through the token
    Shutdown,
    /// Teardown is taking too long for the operator; exit right away
    ForceExit,
}

fn action_for(previous_signals: usize) -> SignalAction {
    if previous_signals == 0 {
        SignalAction::Shutdown
    } else {
        SignalAction::ForceExit
    }
}

/// Trigger `token` when the process receives SIGINT or SIGTERM. A second
/// signal exits immediately with [`exit_code::INTERRUPTED`].
///
/// # Errors
/// Returns an error if the signal handlers cannot be registered.
pub fn install_signal_hook(token: ShutdownToken) -> io::Result<JoinHandle<()>> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    Ok(tokio::spawn(async move {
        let mut received = 0;
        loop {
            let name = tokio::select! {
                Some(()) = interrupt.recv() => "SIGINT",
                Some(()) = terminate.recv() => "SIGTERM",
                else => return,
            };
            match action_for(received) {
                SignalAction::Shutdown => {
                    info!("received {name}, stopping (repeat to exit immediately)");
                    token.trigger();
                }
                SignalAction::ForceExit => {
                    warn!("received {name} again, exiting without cleanup");
                    std::process::exit(exit_code::INTERRUPTED);
                }
            }
            received += 1;
        }
    }))
}
