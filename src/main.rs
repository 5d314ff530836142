// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use kubepipe::{
    constants::{DEFAULT_SHUTDOWN_TIMEOUT, TOKIO_WORKER_THREADS},
    duration::parse_duration,
    pipeline::{Stream, StreamConfig},
    registry::Registry,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info};

#[derive(Parser, Debug)]
#[command(name = "kubepipe", version, about = "Kubernetes plugins for message pipelines", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a stream until SIGINT or SIGTERM
    Run {
        /// Stream configuration file (YAML)
        #[arg(long, short = 'c')]
        config: PathBuf,

        /// Time allowed for the stream to shut down
        #[arg(long, value_parser = parse_duration, default_value = DEFAULT_SHUTDOWN_TIMEOUT)]
        shutdown_timeout: Duration,
    },
    /// Print the configuration schema of every registered plugin
    Schema,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("kubepipe")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            config,
            shutdown_timeout,
        } => {
            init_tracing();
            run(config, shutdown_timeout).await
        }
        Command::Schema => {
            let schemas = Registry::with_builtin().schemas();
            println!("{}", serde_json::to_string_pretty(&schemas)?);
            Ok(())
        }
    }
}

/// Initialize logging.
///
/// Respects `RUST_LOG` (default `info`) and `RUST_LOG_FORMAT` (`json` or `text`).
/// Example: `RUST_LOG=kubepipe=debug RUST_LOG_FORMAT=json kubepipe run -c stream.yaml`
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }

    debug!("Logging initialized with file and line number tracking");
}

async fn run(config_path: PathBuf, shutdown_timeout: Duration) -> Result<()> {
    info!(config = %config_path.display(), "Starting kubepipe");

    let config = StreamConfig::from_file(&config_path)?;
    debug!(
        input = %config.input.name,
        processors = config.pipeline.processors.len(),
        output = %config.output.name,
        "Loaded stream configuration"
    );

    let stream = Stream::build(&config, &Registry::with_builtin())?;
    stream.start()?;

    tokio::select! {
        signal = shutdown_signal() => {
            let signal = signal?;
            info!("Received {signal}, initiating graceful shutdown...");
        }
        stopped = stream.wait_input_stopped() => {
            error!("Input stopped on its own, shutting down");
            let closed = stream.close(shutdown_timeout).await;
            stopped?;
            closed?;
            bail!("Input stopped unexpectedly");
        }
    }

    stream.close(shutdown_timeout).await?;
    info!("Graceful shutdown completed successfully");
    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or, on Unix, SIGTERM (pod termination).
async fn shutdown_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                Ok("SIGINT")
            }
            _ = sigterm.recv() => Ok("SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("SIGINT")
    }
}
