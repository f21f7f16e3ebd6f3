//! Newtype wrappers for OS identifiers

use std::fmt;

/// Process ID of the supervised target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(pub i32);

impl Pid {
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self.0
    }

    /// Path of the process directory under `/proc`.
    #[must_use]
    pub fn proc_path(self) -> String {
        format!("/proc/{}", self.0)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

impl From<u32> for Pid {
    #[allow(clippy::cast_possible_wrap)]
    fn from(raw: u32) -> Self {
        Pid(raw as i32)
    }
}
