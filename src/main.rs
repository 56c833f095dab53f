// ABOUTME: Main entry point for webterm: `attach` runs the terminal client, `serve` the bridge server

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::terminal::disable_raw_mode;
use std::fs::OpenOptions;
use std::process::ExitCode;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;
use webterm::cli::{Cli, Command};
use webterm::config::{AppConfig, ClientConfig};
use webterm::terminal::{AttachExit, TerminalSession};

const DEFAULT_FILTER: &str = "webterm=info";

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("webterm: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if cli.is_client() {
        if let Err(e) = setup_file_logging() {
            eprintln!("webterm: logging disabled: {:#}", e);
        }
        setup_panic_handler();
    } else {
        setup_stderr_logging();
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("webterm: failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match &cli.command {
        Command::Attach { container_id, .. } => runtime.block_on(run_attach(&config.client, container_id)),
        Command::Serve { .. } => runtime.block_on(webterm::server::serve(config.server.clone())),
    };

    // Stdin reads sit on a blocking thread that never returns on its own
    runtime.shutdown_background();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("webterm failed: {:#}", e);
            eprintln!("webterm: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_attach(config: &ClientConfig, container_id: &str) -> Result<()> {
    let exit = TerminalSession::run(config, container_id).await?;
    // Raw mode is already off here, the host terminal was dropped with the session
    match exit {
        AttachExit::Detached => eprintln!("[detached from {}]", container_id),
        AttachExit::RemoteClosed => eprintln!("[connection to {} closed]", container_id),
        AttachExit::LocalClosed => {}
    }
    Ok(())
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("WEBTERM_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| DEFAULT_FILTER.into())
}

/// The client owns the terminal, so its logs go to ~/.webterm/logs
fn setup_file_logging() -> Result<()> {
    let log_dir = AppConfig::log_dir();
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("cannot create {}", log_dir.display()))?;

    let log_file = log_dir.join(format!(
        "webterm-{}.log",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    ));
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .with_context(|| format!("cannot open {}", log_file.display()))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(file)
                .with_ansi(false),
        )
        .with(env_filter())
        .init();
    Ok(())
}

fn setup_stderr_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter())
        .init();
}

fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        // Restore the terminal before anything gets printed
        let _ = disable_raw_mode();

        tracing::error!("webterm panicked: {}", panic_info);
        eprintln!("webterm panicked: {}", panic_info);
        eprintln!("Please check the logs in {} for more details.", AppConfig::log_dir().display());
    }));
}
