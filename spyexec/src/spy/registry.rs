//! Static table of supported spies and auto-detection from the target's
//! executable name.

use crate::domain::ExecError;
use std::path::Path;

/// Literal spy name that asks for auto-detection.
pub const AUTO: &str = "auto";

/// Program name used in suggested commands.
const PROGRAM: &str = "spyexec";

/// A profiler implementation known to this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpyDescriptor {
    pub name: &'static str,
    /// Executable basenames this spy is picked for when the name is `auto`
    pub auto_detect: &'static [&'static str],
    /// Can only observe the process it is linked into
    pub self_profiling_only: bool,
    /// Values of `std::env::consts::ARCH` this spy is unavailable on
    pub excluded_arches: &'static [&'static str],
    /// Reads another process's memory through a privileged interface
    pub needs_privilege: bool,
}

impl SpyDescriptor {
    #[must_use]
    pub fn auto_detectable(&self) -> bool {
        !self.auto_detect.is_empty() && !self.self_profiling_only
    }

    #[must_use]
    pub fn available_on(&self, arch: &str) -> bool {
        !self.excluded_arches.contains(&arch)
    }
}

pub static SPIES: &[SpyDescriptor] = &[
    SpyDescriptor {
        name: "gospy",
        auto_detect: &[],
        self_profiling_only: true,
        excluded_arches: &[],
        needs_privilege: false,
    },
    SpyDescriptor {
        name: "pyspy",
        auto_detect: &["python", "uwsgi", "gunicorn"],
        self_profiling_only: false,
        excluded_arches: &[],
        needs_privilege: false,
    },
    SpyDescriptor {
        name: "rbspy",
        auto_detect: &["ruby", "rails", "bundle"],
        self_profiling_only: false,
        excluded_arches: &["aarch64"],
        needs_privilege: false,
    },
    SpyDescriptor {
        name: "phpspy",
        auto_detect: &["php", "php-fpm"],
        self_profiling_only: false,
        excluded_arches: &[],
        needs_privilege: false,
    },
    SpyDescriptor {
        name: "dotnetspy",
        auto_detect: &["dotnet"],
        self_profiling_only: false,
        excluded_arches: &[],
        needs_privilege: false,
    },
    SpyDescriptor {
        name: "ebpfspy",
        auto_detect: &[],
        self_profiling_only: false,
        excluded_arches: &[],
        needs_privilege: true,
    },
];

/// Look up a spy by its exact name.
#[must_use]
pub fn lookup(name: &str) -> Option<&'static SpyDescriptor> {
    SPIES.iter().find(|s| s.name == name)
}

/// Names of every spy that can attach to a process other than its own.
#[must_use]
pub fn supported_exec_spies() -> Vec<&'static str> {
    SPIES.iter().filter(|s| !s.self_profiling_only).map(|s| s.name).collect()
}

/// Pick a spy for an executable basename.
///
/// Tries an exact match first, then the basename with a trailing version
/// suffix removed, so `python3.11` and `ruby2.7` resolve like `python` and
/// `ruby`.
#[must_use]
pub fn auto_detect(basename: &str) -> Option<&'static SpyDescriptor> {
    let find = |name: &str| {
        SPIES.iter().filter(|s| s.auto_detectable()).find(|s| s.auto_detect.contains(&name))
    };
    find(basename).or_else(|| {
        let stem = strip_version_suffix(basename);
        if stem.is_empty() || stem == basename {
            None
        } else {
            find(stem)
        }
    })
}

fn strip_version_suffix(basename: &str) -> &str {
    basename.trim_end_matches(|c: char| c.is_ascii_digit() || c == '.')
}

/// Advisory listing spies this build cannot offer on `arch`, or an empty string.
#[must_use]
pub fn arch_note(arch: &str) -> String {
    SPIES
        .iter()
        .filter(|s| !s.available_on(arch))
        .map(|s| format!("Note that {} is not available on {arch} platform", s.name))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Resolve the requested spy name against the target's argument vector.
///
/// # Errors
/// - [`ExecError::NoArguments`] when `args` is empty
/// - [`ExecError::NoAutoMatch`] when `requested` is `auto` and nothing matches
/// - [`ExecError::UnsupportedSpy`] for unknown or self-profiling-only names
pub fn resolve(requested: &str, args: &[String]) -> Result<&'static SpyDescriptor, ExecError> {
    let program = args.first().ok_or(ExecError::NoArguments)?;
    let supported: Vec<String> = supported_exec_spies().into_iter().map(String::from).collect();
    let note = arch_note(std::env::consts::ARCH);

    if requested == AUTO {
        let basename = basename_of(program);
        return auto_detect(&basename).ok_or_else(|| ExecError::NoAutoMatch {
            suggested_command: suggested_command(&supported, args),
            basename,
            supported,
            note,
        });
    }

    match lookup(requested) {
        Some(spy) if spy.self_profiling_only => Err(ExecError::UnsupportedSpy {
            name: spy.name.to_string(),
            reason: format!("{} can not profile other processes", spy.name),
            supported,
            note,
        }),
        Some(spy) => Ok(spy),
        None => Err(ExecError::UnsupportedSpy {
            name: requested.to_string(),
            reason: "unknown spy name".to_string(),
            supported,
            note,
        }),
    }
}

fn basename_of(program: &str) -> String {
    Path::new(program)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(program)
        .to_string()
}

fn suggested_command(supported: &[String], args: &[String]) -> String {
    let spy = supported.first().map_or("pyspy", String::as_str);
    format!("{PROGRAM} --spy-name {spy} {}", args.join(" "))
}
