//! Baseline spy backend that samples thread states through `/proc`
//!
//! Each snapshot records one `process;thread;state` stack per thread,
//! extended with the kernel wait channel for sleeping threads. Native
//! stack unwinders plug in behind the same [`Spy`] trait.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;

use super::{Spy, SpyDescriptor, SpyFactory};
use crate::domain::{Pid, SpyError};
use crate::process::stat::{read_comm, read_stat};
use crate::session::Profile;

/// Samples the target (and optionally its descendants) from a procfs root.
pub struct ProcSampler {
    root: Pid,
    detect_subprocesses: bool,
    proc_root: PathBuf,
}

impl ProcSampler {
    #[must_use]
    pub fn new(root: Pid, detect_subprocesses: bool) -> Self {
        Self::with_proc_root(root, detect_subprocesses, "/proc")
    }

    pub fn with_proc_root(root: Pid, detect_subprocesses: bool, proc_root: impl Into<PathBuf>) -> Self {
        Self { root, detect_subprocesses, proc_root: proc_root.into() }
    }

    fn process_dir(&self, pid: i32) -> PathBuf {
        self.proc_root.join(pid.to_string())
    }

    /// The root followed by every descendant reachable through `children` files.
    fn observed_pids(&self) -> Vec<i32> {
        let mut pids = vec![self.root.as_raw()];
        if !self.detect_subprocesses {
            return pids;
        }
        let mut next = 0;
        while next < pids.len() {
            let dir = self.process_dir(pids[next]);
            next += 1;
            for child in children_of(&dir) {
                if !pids.contains(&child) {
                    pids.push(child);
                }
            }
        }
        pids
    }
}

impl Spy for ProcSampler {
    fn snapshot(&mut self, profile: &mut Profile) -> Result<(), SpyError> {
        let root_dir = self.process_dir(self.root.as_raw());
        match read_stat(&root_dir) {
            Ok(stat) if !stat.has_exited() => {}
            Ok(_) => return Err(SpyError::TargetGone(self.root)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SpyError::TargetGone(self.root));
            }
            Err(e) => return Err(e.into()),
        }

        for pid in self.observed_pids() {
            // Descendants may exit between listing and sampling
            if let Err(e) = sample_process(&self.process_dir(pid), profile) {
                debug!("skipping pid {pid}: {e}");
            }
        }
        Ok(())
    }
}

fn sample_process(dir: &Path, profile: &mut Profile) -> io::Result<()> {
    let process = read_comm(dir)?;
    for entry in fs::read_dir(dir.join("task"))?.flatten() {
        let task_dir = entry.path();
        let Ok(stat) = read_stat(&task_dir) else {
            continue;
        };
        let mut stack = format!("{process};{};{}", stat.comm, state_name(stat.state));
        if stat.state != 'R' {
            if let Some(wchan) = read_wchan(&task_dir) {
                stack.push(';');
                stack.push_str(&wchan);
            }
        }
        profile.record(&stack, 1);
    }
    Ok(())
}

fn read_wchan(task_dir: &Path) -> Option<String> {
    let wchan = fs::read_to_string(task_dir.join("wchan")).ok()?;
    let wchan = wchan.trim();
    if wchan.is_empty() || wchan == "0" {
        None
    } else {
        Some(wchan.to_string())
    }
}

fn children_of(process_dir: &Path) -> Vec<i32> {
    let Ok(tasks) = fs::read_dir(process_dir.join("task")) else {
        return Vec::new();
    };
    tasks
        .flatten()
        .filter_map(|task| fs::read_to_string(task.path().join("children")).ok())
        .flat_map(|list| {
            list.split_whitespace().filter_map(|pid| pid.parse().ok()).collect::<Vec<i32>>()
        })
        .collect()
}

fn state_name(state: char) -> &'static str {
    match state {
        'R' => "running",
        'S' => "sleeping",
        'D' => "disk-wait",
        'T' | 't' => "stopped",
        'I' => "idle",
        _ => "other",
    }
}

/// Creates a [`ProcSampler`] for every resolved spy.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcSamplerFactory;

impl SpyFactory for ProcSamplerFactory {
    fn attach(
        &self,
        descriptor: &SpyDescriptor,
        pid: Pid,
        detect_subprocesses: bool,
    ) -> Result<Box<dyn Spy>, SpyError> {
        let sampler = ProcSampler::new(pid, detect_subprocesses);
        let dir = sampler.process_dir(pid.as_raw());
        fs::read_dir(dir.join("task")).map_err(|e| SpyError::Attach {
            pid,
            reason: format!("cannot list threads: {e}"),
        })?;
        debug!("{} attached to {pid} via /proc sampling", descriptor.name);
        Ok(Box::new(sampler))
    }
}
