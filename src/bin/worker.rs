use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use taskplane::common::{bootstrap, StartupConfig};
use taskplane::shutdown::{wait_for_shutdown_signal, ShutdownManager};
use taskplane_core::{LogFormat, LogLevel, SchedulerError};
use taskplane_worker::WorkerService;

/// Taskplane worker: connects to the dispatcher and runs dispatched tasks
#[derive(Debug, Parser)]
#[command(name = "taskplane-worker", version, about)]
struct Cli {
    /// Dispatcher host name or IP, also used for the artifact store
    #[arg(short, long, value_name = "HOST")]
    address: Option<String>,

    /// Dispatcher control port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Directory for downloaded artifacts and the sandbox
    #[arg(long, value_name = "DIR")]
    tasks_dir: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Log format (json, pretty, text)
    #[arg(long, value_name = "FORMAT", default_value = "pretty")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let startup_config = StartupConfig {
        config_path: cli.config.clone(),
        log_level: cli.log_level,
        log_format: cli.log_format,
    };

    let mut config = bootstrap(&startup_config, "worker")?;
    if let Some(address) = cli.address {
        config.worker.address = address;
    }
    if let Some(port) = cli.port {
        config.worker.port = port;
    }
    if let Some(tasks_dir) = cli.tasks_dir {
        config.worker.tasks_dir = tasks_dir;
    }
    config
        .worker
        .validate()
        .context("invalid worker configuration after CLI overrides")?;

    info!(dispatcher = %config.worker.scheduler_address(), "Starting worker");

    let shutdown_manager = ShutdownManager::new();
    let shutdown_rx = shutdown_manager.subscribe().await;
    let service = WorkerService::new(config.worker);

    let run = service.run(shutdown_rx);
    tokio::pin!(run);

    let result = tokio::select! {
        result = &mut run => result,
        _ = wait_for_shutdown_signal() => {
            shutdown_manager.shutdown().await;
            run.await
        }
    };

    match result {
        Ok(()) => {
            info!("Worker stopped");
            Ok(ExitCode::SUCCESS)
        }
        Err(SchedulerError::ConnectionLost(reason)) => {
            error!(reason = %reason, "Dispatcher closed the connection, exiting");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e).context("worker failed"),
    }
}
