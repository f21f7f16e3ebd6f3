//! Spy registry and the seams spy backends plug into
//!
//! - `registry`: static table of known spies and auto-detection
//! - `proc_sampler`: baseline backend that samples thread states from `/proc`

pub mod proc_sampler;
pub mod registry;

pub use proc_sampler::{ProcSampler, ProcSamplerFactory};
pub use registry::{auto_detect, lookup, resolve, supported_exec_spies, SpyDescriptor, AUTO};

use crate::domain::{Pid, SpyError};
use crate::session::Profile;

/// A sampler attached to one target process.
pub trait Spy: Send {
    /// Take one sample of every observed thread and add it to `profile`.
    ///
    /// # Errors
    /// [`SpyError::TargetGone`] once the target can no longer be observed.
    fn snapshot(&mut self, profile: &mut Profile) -> Result<(), SpyError>;
}

/// Builds spies for resolved descriptors.
pub trait SpyFactory: Send + Sync {
    /// # Errors
    /// Returns [`SpyError::Attach`] when the backend cannot observe `pid`.
    fn attach(
        &self,
        descriptor: &SpyDescriptor,
        pid: Pid,
        detect_subprocesses: bool,
    ) -> Result<Box<dyn Spy>, SpyError>;
}
