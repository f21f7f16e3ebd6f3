//! Test doubles shared by the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use spyexec::config::ExecConfig;
use spyexec::domain::SpyError;
use spyexec::preflight::Host;
use spyexec::session::{Profile, UploadJob, Upstream};
use spyexec::spy::{Spy, SpyDescriptor, SpyFactory};
use spyexec::Pid;

#[derive(Default)]
pub struct RecordingUpstream {
    pub jobs: Mutex<Vec<UploadJob>>,
    pub stops: AtomicUsize,
}

impl RecordingUpstream {
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn samples(&self) -> u64 {
        self.jobs.lock().unwrap().iter().map(|j| j.profile.total_samples()).sum()
    }
}

impl Upstream for RecordingUpstream {
    fn upload(&self, job: UploadJob) {
        self.jobs.lock().unwrap().push(job);
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records one `main` sample per snapshot and counts attaches and session stops.
#[derive(Default)]
pub struct CountingSpies {
    pub attaches: AtomicUsize,
    pub spies_dropped: Arc<AtomicUsize>,
}

impl CountingSpies {
    pub fn attaches(&self) -> usize {
        self.attaches.load(Ordering::SeqCst)
    }

    pub fn spies_dropped(&self) -> usize {
        self.spies_dropped.load(Ordering::SeqCst)
    }
}

struct CountingSpy {
    dropped: Arc<AtomicUsize>,
}

impl Spy for CountingSpy {
    fn snapshot(&mut self, profile: &mut Profile) -> Result<(), SpyError> {
        profile.record("main", 1);
        Ok(())
    }
}

impl Drop for CountingSpy {
    fn drop(&mut self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

impl SpyFactory for CountingSpies {
    fn attach(
        &self,
        _descriptor: &SpyDescriptor,
        _pid: Pid,
        _detect_subprocesses: bool,
    ) -> Result<Box<dyn Spy>, SpyError> {
        self.attaches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingSpy { dropped: Arc::clone(&self.spies_dropped) }))
    }
}

pub fn host() -> Host {
    Host { os: "linux".to_string(), arch: "x86_64".to_string(), privileged: true }
}

/// Fast timings so a run finishes within a second or two.
pub fn config(spy_name: &str, args: &[&str]) -> ExecConfig {
    ExecConfig {
        spy_name: spy_name.to_string(),
        args: args.iter().map(|s| (*s).to_string()).collect(),
        sample_rate: 100,
        upload_rate: Duration::from_secs(60),
        ready_timeout: Duration::from_millis(500),
        ready_poll_interval: Duration::from_millis(20),
        liveness_interval: Duration::from_millis(100),
        ..ExecConfig::default()
    }
}
