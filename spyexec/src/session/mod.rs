//! Profiling session bound to one target PID
//!
//! - `profile`: folded-stack accumulation and upload jobs
//! - `upstream`: delivery to the remote collector
//!
//! A session samples on its own thread at `sample_rate` Hz and hands a
//! profile window to the upstream every `upload_rate`. Stopping uploads
//! the last partial window before returning.

pub mod profile;
pub mod upstream;

pub use profile::{Profile, UploadJob};
pub use upstream::{RemoteConfig, RemoteUpstream, UploadStats, Upstream};

use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use log::{debug, info, warn};

use crate::domain::{Pid, SpyError};
use crate::spy::Spy;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub application_name: String,
    pub spy_name: String,
    /// Samples per second
    pub sample_rate: u32,
    pub pid: Pid,
    pub detect_subprocesses: bool,
    pub upload_rate: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub snapshots: u64,
    pub uploads: u64,
}

pub struct ProfilingSession {
    config: SessionConfig,
    upstream: Arc<dyn Upstream>,
    spy: Option<Box<dyn Spy>>,
    stop_tx: Option<Sender<()>>,
    sampler: Option<JoinHandle<SessionStats>>,
    stats: SessionStats,
}

impl ProfilingSession {
    #[must_use]
    pub fn new(config: SessionConfig, upstream: Arc<dyn Upstream>, spy: Box<dyn Spy>) -> Self {
        Self { config, upstream, spy: Some(spy), stop_tx: None, sampler: None, stats: SessionStats::default() }
    }

    /// Start the sampling thread. Calling it again is a no-op.
    ///
    /// # Errors
    /// Returns an error if the thread cannot be spawned.
    pub fn start(&mut self) -> io::Result<()> {
        let Some(spy) = self.spy.take() else {
            return Ok(());
        };
        let (stop_tx, stop_rx) = bounded(1);
        let sampler = Sampler {
            config: self.config.clone(),
            upstream: Arc::clone(&self.upstream),
            spy,
            stop_rx,
        };
        let handle = std::thread::Builder::new().name("sampler".to_string()).spawn(move || sampler.run())?;
        self.stop_tx = Some(stop_tx);
        self.sampler = Some(handle);
        info!(
            "profiling {} as \"{}\" with {} at {} Hz",
            self.config.pid, self.config.application_name, self.config.spy_name, self.config.sample_rate
        );
        Ok(())
    }

    /// Stop sampling and upload what was collected. Idempotent.
    pub fn stop(&mut self) -> SessionStats {
        // Closing the channel is the stop signal
        drop(self.stop_tx.take());
        if let Some(handle) = self.sampler.take() {
            match handle.join() {
                Ok(stats) => {
                    self.stats = stats;
                    info!("session stopped: {} snapshots, {} uploads", stats.snapshots, stats.uploads);
                }
                Err(_) => warn!("sampler thread panicked"),
            }
        }
        self.spy = None;
        self.stats
    }
}

impl Drop for ProfilingSession {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Sampler {
    config: SessionConfig,
    upstream: Arc<dyn Upstream>,
    spy: Box<dyn Spy>,
    stop_rx: Receiver<()>,
}

impl Sampler {
    fn run(mut self) -> SessionStats {
        let period = Duration::from_secs_f64(1.0 / f64::from(self.config.sample_rate.max(1)));
        let samples = tick(period);
        let uploads = tick(self.config.upload_rate);
        let mut stats = SessionStats::default();
        let mut profile = Profile::new();
        let mut window_start = SystemTime::now();

        loop {
            select! {
                recv(self.stop_rx) -> _ => break,
                recv(samples) -> _ => {
                    match self.spy.snapshot(&mut profile) {
                        Ok(()) => stats.snapshots += 1,
                        Err(SpyError::TargetGone(pid)) => {
                            debug!("{pid} is gone, sampling finished");
                            break;
                        }
                        Err(e) => {
                            warn!("sampling stopped: {e}");
                            break;
                        }
                    }
                }
                recv(uploads) -> _ => {
                    if self.flush(&mut profile, &mut window_start) {
                        stats.uploads += 1;
                    }
                }
            }
        }

        if self.flush(&mut profile, &mut window_start) {
            stats.uploads += 1;
        }
        stats
    }

    /// Hand the current window to the upstream; false when there was nothing to send.
    fn flush(&self, profile: &mut Profile, window_start: &mut SystemTime) -> bool {
        if profile.is_empty() {
            return false;
        }
        let until = SystemTime::now();
        self.upstream.upload(UploadJob {
            name: self.config.application_name.clone(),
            spy_name: self.config.spy_name.clone(),
            sample_rate: self.config.sample_rate,
            from: *window_start,
            until,
            profile: std::mem::take(profile),
        });
        *window_start = until;
        true
    }
}
