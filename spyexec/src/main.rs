//! # spyexec - Main Entry Point
//!
//! `spyexec [OPTIONS] <COMMAND> [ARGS]...` runs COMMAND under a spy and
//! exits with COMMAND's exit code.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use spyexec::cli::Args;
use spyexec::domain::errors::exit_code;
use spyexec::exec::exec;
use spyexec::supervisor::{install_signal_hook, ShutdownToken};
use spyexec::ExecError;

fn main() {
    let args = Args::parse();
    init_logging(&args);

    std::process::exit(match run(args) {
        Ok(code) => code,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn init_logging(args: &Args) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = args.log_filter() {
        builder.filter_level(level);
    }
    builder.init();
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<ExecError>().map_or(exit_code::GENERAL_ERROR, ExecError::exit_code)
}

#[tokio::main]
async fn run(args: Args) -> Result<i32> {
    let config = args.into_config();

    let shutdown = ShutdownToken::new();
    install_signal_hook(shutdown.clone()).context("Failed to install signal handlers")?;

    let outcome = exec(&config, shutdown).await?;
    info!(
        "{} finished ({:?}), exit code {}",
        outcome.application_name,
        outcome.event,
        outcome.exit_code()
    );
    Ok(outcome.exit_code())
}
