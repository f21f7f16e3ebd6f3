//! Target process lifecycle: spawn, liveness and readiness

pub mod launcher;
pub mod liveness;
pub mod readiness;
pub mod stat;

pub use launcher::{await_exit, spawn, ExitDetection, ExitNotice, TargetProcess};
pub use liveness::{probe, Fingerprint, Liveness};
pub use readiness::{wait_until_ready, Readiness};
