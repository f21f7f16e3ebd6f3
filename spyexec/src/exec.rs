//! End-to-end exec flow
//!
//! resolve spy → preflight → spawn → wait for readiness → start session →
//! supervise → stop session → stop upstream → reap.
//!
//! Once the target is spawned, [`Teardown`] owns the session and the
//! upstream and stops each exactly once, whichever way the run ends.

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::ExecConfig;
use crate::domain::errors::exit_code;
use crate::domain::{ExecError, Pid};
use crate::preflight::{run_preflight_checks, Host, PreflightReport};
use crate::process::{self, await_exit, wait_until_ready, Readiness};
use crate::session::{ProfilingSession, RemoteUpstream, SessionConfig, Upstream};
use crate::spy::{self, ProcSamplerFactory, SpyDescriptor, SpyFactory};
use crate::supervisor::{LivenessSupervisor, ShutdownToken, TerminationEvent};

/// Upper bound on waiting for a killed or exited target to be reaped
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything decided before anything is spawned.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub spy: &'static SpyDescriptor,
    pub application_name: String,
    pub report: PreflightReport,
}

#[derive(Debug)]
pub struct ExecOutcome {
    pub spy_name: &'static str,
    pub application_name: String,
    pub event: TerminationEvent,
    pub exit_status: Option<ExitStatus>,
}

impl ExecOutcome {
    /// The target's exit code, `128 + signal` if it was killed, 0 if unknown.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.exit_status
            .and_then(|status| status.code().or_else(|| status.signal().map(|sig| 128 + sig)))
            .unwrap_or(exit_code::SUCCESS)
    }
}

/// Validate the configuration, resolve the spy and run preflight.
///
/// # Errors
/// [`ExecError::NoArguments`], [`ExecError::InvalidConfig`],
/// [`ExecError::NoAutoMatch`] or [`ExecError::UnsupportedSpy`]; nothing has
/// been spawned when any of them is returned.
pub fn prepare(config: &ExecConfig, host: &Host) -> Result<Prepared, ExecError> {
    if config.args.is_empty() {
        return Err(ExecError::NoArguments);
    }
    config.validate()?;

    let spy = spy::resolve(&config.spy_name, &config.args)?;
    let report = run_preflight_checks(spy, host)?;
    report.log_advisories();

    Ok(Prepared { spy, application_name: config.application_name_for(spy.name), report })
}

/// Prepare, then run against the `/proc` sampler and the remote collector.
///
/// # Errors
/// Any error from [`prepare`] or [`run_exec`].
pub async fn exec(config: &ExecConfig, shutdown: ShutdownToken) -> Result<ExecOutcome, ExecError> {
    info!("to disable logging from spyexec, pass --no-logging");
    let prepared = prepare(config, &Host::current())?;
    let remote = config.remote_config();
    run_exec(config, &prepared, &ProcSamplerFactory, shutdown, move || {
        Ok(Arc::new(RemoteUpstream::new(remote)?) as Arc<dyn Upstream>)
    })
    .await
}

/// Spawn the target, profile it and supervise it until it is gone.
///
/// `make_upstream` is called right after spawn; if it fails the target is
/// killed before the error is returned.
///
/// # Errors
/// [`ExecError::InvalidConfig`] before anything is spawned,
/// [`ExecError::Spawn`] with the OS error, or the error from `make_upstream`.
pub async fn run_exec<F>(
    config: &ExecConfig,
    prepared: &Prepared,
    spies: &dyn SpyFactory,
    shutdown: ShutdownToken,
    make_upstream: F,
) -> Result<ExecOutcome, ExecError>
where
    F: FnOnce() -> Result<Arc<dyn Upstream>, ExecError>,
{
    config.validate()?;
    let mut target = process::spawn(&config.args, config.exit_detection)?;
    let pid = target.pid();
    let mut teardown = Teardown::new(make_upstream()?);

    let readiness = tokio::select! {
        biased;
        () = shutdown.triggered() => None,
        readiness = wait_until_ready(target.fingerprint(), config.ready_poll_interval, config.ready_timeout) => Some(readiness),
    };
    match readiness {
        Some(Readiness::Ready(elapsed)) => debug!("{pid} ready after {elapsed:?}"),
        Some(Readiness::TimedOut) => {
            warn!("{pid} did not settle within {:?}, attaching anyway", config.ready_timeout);
        }
        Some(Readiness::Exited) => info!("{pid} exited before it could be profiled"),
        None => debug!("shutdown requested before {pid} was ready"),
    }

    if matches!(readiness, Some(Readiness::Ready(_) | Readiness::TimedOut)) {
        teardown.session = start_session(config, prepared, spies, &teardown.upstream, pid);
    }

    let termination =
        LivenessSupervisor::new(shutdown, config.liveness_interval).run(&mut target).await;

    // Joins the sampler thread and drains the upload queue
    if let Err(e) = tokio::task::spawn_blocking(move || teardown.finish()).await {
        warn!("session teardown did not complete: {e}");
    }

    let exit_status = match (termination.exit_status, termination.pending_exit) {
        (Some(status), _) => Some(status),
        (None, Some(notice)) => await_exit(pid, notice, REAP_TIMEOUT).await,
        (None, None) => target.reap(REAP_TIMEOUT).await,
    };
    target.mark_finished();
    debug!("{pid} ran for {:?}", target.started_at().elapsed().unwrap_or_default());

    Ok(ExecOutcome {
        spy_name: prepared.spy.name,
        application_name: prepared.application_name.clone(),
        event: termination.event,
        exit_status,
    })
}

/// Attach the spy and start sampling. The target keeps running unprofiled
/// if either step fails.
fn start_session(
    config: &ExecConfig,
    prepared: &Prepared,
    spies: &dyn SpyFactory,
    upstream: &Arc<dyn Upstream>,
    pid: Pid,
) -> Option<ProfilingSession> {
    let spy = match spies.attach(prepared.spy, pid, config.detect_subprocesses) {
        Ok(spy) => spy,
        Err(e) => {
            let notes = prepared.report.notes();
            if notes.is_empty() {
                warn!("{e}, {pid} keeps running without profiling");
            } else {
                warn!("{e}, {pid} keeps running without profiling\n{notes}");
            }
            return None;
        }
    };
    let mut session = ProfilingSession::new(
        SessionConfig {
            application_name: prepared.application_name.clone(),
            spy_name: prepared.spy.name.to_string(),
            sample_rate: config.sample_rate,
            pid,
            detect_subprocesses: config.detect_subprocesses,
            upload_rate: config.upload_rate,
        },
        Arc::clone(upstream),
        spy,
    );
    match session.start() {
        Ok(()) => Some(session),
        Err(e) => {
            warn!("failed to start sampling {pid}: {e}");
            None
        }
    }
}

/// Stops the session, then the upstream, exactly once.
struct Teardown {
    session: Option<ProfilingSession>,
    upstream: Arc<dyn Upstream>,
    done: bool,
}

impl Teardown {
    fn new(upstream: Arc<dyn Upstream>) -> Self {
        Self { session: None, upstream, done: false }
    }

    fn finish(&mut self) {
        if std::mem::replace(&mut self.done, true) {
            return;
        }
        if let Some(mut session) = self.session.take() {
            session.stop();
        }
        self.upstream.stop();
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> Host {
        Host { os: "linux".to_string(), arch: "x86_64".to_string(), privileged: true }
    }

    fn config(spy_name: &str, args: &[&str]) -> ExecConfig {
        ExecConfig {
            spy_name: spy_name.to_string(),
            args: args.iter().map(|s| (*s).to_string()).collect(),
            ..ExecConfig::default()
        }
    }

    #[test]
    fn test_prepare_requires_arguments() {
        assert!(matches!(prepare(&config("auto", &[]), &host()), Err(ExecError::NoArguments)));
    }

    #[test]
    fn test_prepare_resolves_spy_and_name() {
        let prepared = prepare(&config("auto", &["python3", "app.py"]), &host()).unwrap();
        assert_eq!(prepared.spy.name, "pyspy");
        assert_eq!(prepared.application_name, "pyspy.python3");
        assert!(prepared.report.advisories.is_empty());
    }

    #[test]
    fn test_prepare_rejects_self_profiling_spy() {
        let err = prepare(&config("gospy", &["./server"]), &host()).unwrap_err();
        assert!(matches!(err, ExecError::UnsupportedSpy { .. }));
    }

    #[test]
    fn test_exit_code() {
        let outcome = |raw| ExecOutcome {
            spy_name: "pyspy",
            application_name: "app".to_string(),
            event: TerminationEvent::ProcessObservedDead,
            exit_status: Some(ExitStatus::from_raw(raw)),
        };
        assert_eq!(outcome(3 << 8).exit_code(), 3);
        assert_eq!(outcome(libc::SIGKILL).exit_code(), 137);
    }
}
