//! # spyexec - run a program under an attachable profiler
//!
//! spyexec launches a program, attaches a spy to it without requiring the
//! program to be instrumented, streams the collected profiles to a remote
//! collector, and supervises the program so profiling starts and stops
//! around its actual execution window.
//!
//! ## Program flow
//!
//! ```text
//!  spy registry ──▶ preflight ──▶ launcher ──▶ readiness
//!                                                 │
//!                                                 ▼
//!  collector ◀── upstream ◀── profiling session (started)
//!                                                 │
//!                                                 ▼
//!                       liveness supervisor (blocks until terminated)
//!                                                 │
//!                                                 ▼
//!                session stop ──▶ upstream stop ──▶ reap
//! ```
//!
//! ## Module Structure
//!
//! - [`spy`]: registry of known spies, auto-detection, and the `/proc` sampler
//! - [`preflight`]: host checks for the resolved spy (architecture, privileges)
//! - [`process`]: spawning the target in its own process group, liveness and
//!   readiness probes
//! - [`session`]: sampling loop, folded profiles, and the remote upstream
//! - [`supervisor`]: shutdown token and the liveness supervisor that turns
//!   two racing termination sources into one event
//! - [`exec`]: the end-to-end flow tying the pieces together
//! - [`cli`], [`config`]: argument parsing and the resolved configuration
//! - [`domain`]: `Pid` and the error taxonomy
//!
//! ## Termination
//!
//! The supervisor ends a run in exactly one of two ways:
//!
//! - **`ExternalShutdownRequested`**: the operator interrupted spyexec; the
//!   target's process group is killed.
//! - **`ProcessObservedDead`**: the target exited on its own, seen either
//!   through the reaper's exit notice or a failed liveness check; nothing
//!   is killed.
//!
//! Either way the session is stopped, its last profile window uploaded, and
//! the upstream flushed before spyexec exits.

pub mod cli;
pub mod config;
pub mod domain;
pub mod exec;
pub mod preflight;
pub mod process;
pub mod session;
pub mod spy;
pub mod supervisor;

pub use domain::{ExecError, Pid};
