//! Domain model for spyexec
//!
//! Core types shared by the launcher, the supervisor and the session:
//! - Compile-time safety via newtype pattern
//! - Structured error handling

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use types::Pid;

pub use errors::{ExecError, SpyError, UploadError};
