//! Structured error types for spyexec
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::Pid;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("no arguments passed: expected the program to run and its arguments")]
    NoArguments,

    #[error(
        "could not automatically find a spy for program \"{basename}\". \
         Pass spy name via --spy-name argument, for example:\n  {suggested_command}\n\n\
         Available spies are: {}\n{note}",
        .supported.join(",")
    )]
    NoAutoMatch { basename: String, suggested_command: String, supported: Vec<String>, note: String },

    #[error("spy \"{name}\" is not supported: {reason}\n\nAvailable spies are: {}\n{note}", .supported.join(","))]
    UnsupportedSpy { name: String, reason: String, supported: Vec<String>, note: String },

    /// The OS refused to create the target; the error is the one `spawn` returned.
    #[error(transparent)]
    Spawn(std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Upstream(#[from] UploadError),
}

/// Errors raised by spy backends while attaching or sampling.
#[derive(Error, Debug)]
pub enum SpyError {
    #[error("failed to attach to {pid}: {reason}")]
    Attach { pid: Pid, reason: String },

    #[error("process {0} is gone")]
    TargetGone(Pid),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised while delivering profiles to the collector.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("invalid server address \"{0}\": expected http:// or https://")]
    InvalidAddress(String),

    #[error("collector rejected upload with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("upload queue is full")]
    QueueFull,

    #[error("upstream is stopped")]
    Closed,

    #[error("failed to start upload worker: {0}")]
    Worker(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

// Exit codes for the binary
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NO_SPY: i32 = 3;
    pub const NOT_EXECUTABLE: i32 = 126;
    pub const NOT_FOUND: i32 = 127;
    /// Forced exit on a repeated SIGINT/SIGTERM
    pub const INTERRUPTED: i32 = 130;
}

impl ExecError {
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            ExecError::NoArguments | ExecError::InvalidConfig(_) => exit_code::USAGE,
            ExecError::NoAutoMatch { .. } | ExecError::UnsupportedSpy { .. } => exit_code::NO_SPY,
            ExecError::Spawn(e) => match e.kind() {
                std::io::ErrorKind::NotFound => exit_code::NOT_FOUND,
                std::io::ErrorKind::PermissionDenied => exit_code::NOT_EXECUTABLE,
                _ => exit_code::GENERAL_ERROR,
            },
            _ => exit_code::GENERAL_ERROR,
        }
    }

    /// Ready-to-run commands suggested to the operator, if any.
    #[must_use]
    pub fn suggested_commands(&self) -> Vec<&str> {
        match self {
            ExecError::NoAutoMatch { suggested_command, .. } => vec![suggested_command.as_str()],
            _ => Vec::new(),
        }
    }
}
