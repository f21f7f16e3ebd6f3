//! Pre-flight checks for spyexec
//!
//! Validates the resolved spy against the host before the target is spawned.
//! Only a spy that cannot attach to another process fails the run; privilege
//! and architecture problems are advisories, since spies degrade rather than
//! fail outright.

#![allow(unsafe_code)] // geteuid() requires unsafe

use std::fmt;

use log::warn;

use crate::domain::ExecError;
use crate::spy::registry::{arch_note, supported_exec_spies, SpyDescriptor};

/// The platform facts preflight decides on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    pub os: String,
    pub arch: String,
    pub privileged: bool,
}

impl Host {
    #[must_use]
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            privileged: unsafe { libc::geteuid() } == 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advisory {
    /// The spy is not built for this CPU architecture
    Architecture { spy: &'static str, arch: String },
    /// Reading another process's memory needs root here
    Privilege { spy: &'static str, os: String },
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisory::Architecture { spy, arch } => {
                write!(f, "Note that {spy} is not available on {arch} platform")
            }
            Advisory::Privilege { spy, os } => {
                write!(f, "on {os} {spy} requires root privileges, run with: sudo spyexec ...")
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreflightReport {
    pub advisories: Vec<Advisory>,
}

impl PreflightReport {
    pub fn log_advisories(&self) {
        for advisory in &self.advisories {
            warn!("{advisory}");
        }
    }

    /// Advisories rendered one per line, for appending to later errors.
    #[must_use]
    pub fn notes(&self) -> String {
        self.advisories.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n")
    }
}

/// Run all pre-flight checks before spawning the target
///
/// # Errors
/// [`ExecError::UnsupportedSpy`] when the spy can only profile its own process.
pub fn run_preflight_checks(spy: &SpyDescriptor, host: &Host) -> Result<PreflightReport, ExecError> {
    check_external_attach(spy, host)?;

    let mut report = PreflightReport::default();
    if let Some(advisory) = check_architecture(spy, host) {
        report.advisories.push(advisory);
    }
    if let Some(advisory) = check_privileges(spy, host) {
        report.advisories.push(advisory);
    }
    Ok(report)
}

fn check_external_attach(spy: &SpyDescriptor, host: &Host) -> Result<(), ExecError> {
    if !spy.self_profiling_only {
        return Ok(());
    }
    Err(ExecError::UnsupportedSpy {
        name: spy.name.to_string(),
        reason: format!("{} can not profile other processes", spy.name),
        supported: supported_exec_spies().into_iter().map(String::from).collect(),
        note: arch_note(&host.arch),
    })
}

fn check_architecture(spy: &SpyDescriptor, host: &Host) -> Option<Advisory> {
    (!spy.available_on(&host.arch))
        .then(|| Advisory::Architecture { spy: spy.name, arch: host.arch.clone() })
}

fn check_privileges(spy: &SpyDescriptor, host: &Host) -> Option<Advisory> {
    if host.privileged {
        return None;
    }
    (spy.needs_privilege || host.os == "macos")
        .then(|| Advisory::Privilege { spy: spy.name, os: host.os.clone() })
}
