//! CLI argument definitions

use clap::{Parser, ValueEnum};
use log::LevelFilter;
use std::time::Duration;

use crate::config::ExecConfig;
use crate::process::ExitDetection;
use crate::spy::AUTO;

#[derive(Parser, Debug)]
#[command(
    name = "spyexec",
    version,
    about = "Launch a program and profile it with an attachable spy",
    after_help = "\
EXAMPLES:
    spyexec python3 app.py                          Auto-detect the spy from the program name
    spyexec --spy-name rbspy bundle exec puma       Explicit spy
    spyexec --server-address http://pyroscope:4040 --application-name web.cpu python3 app.py"
)]
pub struct Args {
    /// Spy to attach, or "auto" to pick one from the program name
    #[arg(long, env = "SPYEXEC_SPY_NAME", default_value = AUTO)]
    pub spy_name: String,

    /// Application name reported to the collector (default: <spy>.<program>)
    #[arg(long, env = "SPYEXEC_APPLICATION_NAME")]
    pub application_name: Option<String>,

    /// Collector address
    #[arg(long, env = "SPYEXEC_SERVER_ADDRESS", default_value = "http://localhost:4040")]
    pub server_address: String,

    /// Bearer token sent with every upload
    #[arg(long, env = "SPYEXEC_AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: Option<String>,

    /// Number of upload workers
    #[arg(long, env = "SPYEXEC_UPSTREAM_THREADS", default_value = "4")]
    pub upstream_threads: usize,

    /// Timeout of a single upload request
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    pub upstream_request_timeout: Duration,

    /// How often collected profiles are uploaded
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    pub upload_rate: Duration,

    /// Samples per second
    #[arg(long, default_value = "100")]
    pub sample_rate: u32,

    /// Also profile processes started by the target
    #[arg(long, env = "SPYEXEC_DETECT_SUBPROCESSES")]
    pub detect_subprocesses: bool,

    /// Upper bound on waiting for the target to become attachable
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub ready_timeout: Duration,

    /// Interval between process-table liveness checks
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    pub liveness_interval: Duration,

    /// How the target's exit is detected
    #[arg(long, value_enum, default_value = "wait")]
    pub exit_detection: DetectionArg,

    /// Log level (error, warn, info, debug, trace); overrides RUST_LOG
    #[arg(long, env = "SPYEXEC_LOG_LEVEL")]
    pub log_level: Option<LevelFilter>,

    /// Disable spyexec's own logging
    #[arg(long)]
    pub no_logging: bool,

    /// Program to run, followed by its arguments
    #[arg(value_name = "COMMAND", trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionArg {
    /// Direct child-exit notification plus polling
    Wait,
    /// Process-table polling only
    Poll,
}

impl From<DetectionArg> for ExitDetection {
    fn from(arg: DetectionArg) -> Self {
        match arg {
            DetectionArg::Wait => ExitDetection::Wait,
            DetectionArg::Poll => ExitDetection::Poll,
        }
    }
}

impl Args {
    /// Effective log filter: `--no-logging` wins over `--log-level`.
    #[must_use]
    pub fn log_filter(&self) -> Option<LevelFilter> {
        if self.no_logging {
            Some(LevelFilter::Off)
        } else {
            self.log_level
        }
    }

    #[must_use]
    pub fn into_config(self) -> ExecConfig {
        ExecConfig {
            spy_name: self.spy_name,
            application_name: self.application_name,
            server_address: self.server_address,
            auth_token: self.auth_token,
            upstream_threads: self.upstream_threads,
            upstream_request_timeout: self.upstream_request_timeout,
            upload_rate: self.upload_rate,
            sample_rate: self.sample_rate,
            detect_subprocesses: self.detect_subprocesses,
            ready_timeout: self.ready_timeout,
            liveness_interval: self.liveness_interval,
            exit_detection: self.exit_detection.into(),
            args: self.args,
            ..ExecConfig::default()
        }
    }
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    if let Ok(d) = humantime::parse_duration(s) {
        return Ok(d);
    }

    // Bare number as seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    Err(format!("Invalid duration '{s}'. Examples: 500ms, 10s, 1m, 90"))
}
