//! Resolved configuration of one exec run

use std::path::Path;
use std::time::Duration;

use crate::domain::ExecError;
use crate::process::ExitDetection;
use crate::session::RemoteConfig;
use crate::spy::AUTO;

/// Highest accepted sample rate, in Hz
const MAX_SAMPLE_RATE: u32 = 10_000;

#[derive(Debug, Clone)]
pub struct ExecConfig {
    pub spy_name: String,
    /// `None` derives `<spy>.<program>`
    pub application_name: Option<String>,
    pub server_address: String,
    pub auth_token: Option<String>,
    pub upstream_threads: usize,
    pub upstream_request_timeout: Duration,
    pub upload_rate: Duration,
    pub sample_rate: u32,
    pub detect_subprocesses: bool,
    pub ready_timeout: Duration,
    pub ready_poll_interval: Duration,
    pub liveness_interval: Duration,
    pub exit_detection: ExitDetection,
    pub args: Vec<String>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            spy_name: AUTO.to_string(),
            application_name: None,
            server_address: "http://localhost:4040".to_string(),
            auth_token: None,
            upstream_threads: 4,
            upstream_request_timeout: Duration::from_secs(10),
            upload_rate: Duration::from_secs(10),
            sample_rate: 100,
            detect_subprocesses: false,
            ready_timeout: Duration::from_secs(5),
            ready_poll_interval: Duration::from_millis(100),
            liveness_interval: Duration::from_secs(1),
            exit_detection: ExitDetection::Wait,
            args: Vec::new(),
        }
    }
}

impl ExecConfig {
    /// Reject values the run cannot work with. Empty `args` is left to the
    /// exec entry point, which reports it as [`ExecError::NoArguments`].
    ///
    /// # Errors
    /// [`ExecError::InvalidConfig`] naming the offending setting.
    pub fn validate(&self) -> Result<(), ExecError> {
        let invalid = |msg: String| Err(ExecError::InvalidConfig(msg));

        if self.upstream_threads == 0 {
            return invalid("upstream threads must be at least 1".to_string());
        }
        if self.sample_rate == 0 || self.sample_rate > MAX_SAMPLE_RATE {
            return invalid(format!(
                "sample rate must be between 1 and {MAX_SAMPLE_RATE} Hz, got {}",
                self.sample_rate
            ));
        }
        for (name, value) in [
            ("upstream request timeout", self.upstream_request_timeout),
            ("upload rate", self.upload_rate),
            ("ready timeout", self.ready_timeout),
            ("ready poll interval", self.ready_poll_interval),
            ("liveness interval", self.liveness_interval),
        ] {
            if value.is_zero() {
                return invalid(format!("{name} must be greater than zero"));
            }
        }
        if !(self.server_address.starts_with("http://") || self.server_address.starts_with("https://")) {
            return invalid(format!(
                "server address \"{}\" must start with http:// or https://",
                self.server_address
            ));
        }
        Ok(())
    }

    /// Application name for a resolved spy: the configured one, else `<spy>.<program>`.
    #[must_use]
    pub fn application_name_for(&self, spy_name: &str) -> String {
        if let Some(name) = self.application_name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        let program = self
            .args
            .first()
            .and_then(|p| Path::new(p).file_name())
            .and_then(|n| n.to_str())
            .unwrap_or("app");
        format!("{spy_name}.{program}")
    }

    #[must_use]
    pub fn remote_config(&self) -> RemoteConfig {
        RemoteConfig {
            server_address: self.server_address.clone(),
            auth_token: self.auth_token.clone(),
            threads: self.upstream_threads,
            request_timeout: self.upstream_request_timeout,
        }
    }
}
