//! Rota Batch - Entry Point
//!
//! Loads payloads and proxies, runs the batch and exits with a status that
//! says whether every payload succeeded.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rota_batch::cli::Cli;
use rota_batch::config::LogConfig;
use rota_batch::engine::{ExecutorConfig, SchedulerConfig};
use rota_batch::proxy::HttpTransport;
use rota_batch::sink::FileSink;
use rota_batch::{source, BatchError, Config, RequestExecutor, RunReport, Scheduler};

const EXIT_FAILED_PAYLOADS: u8 = 1;
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("An error occurred: {}", e);
            return ExitCode::from(e.exit_code());
        }
    };

    init_tracing(&config.log);

    match run(cli, config).await {
        Ok(report) => {
            log_summary(&report);
            if report.cancelled() > 0 {
                ExitCode::from(EXIT_INTERRUPTED)
            } else if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_FAILED_PAYLOADS)
            }
        }
        Err(e) => {
            error!("An error occurred: {:#}", e);
            let code = e
                .downcast_ref::<BatchError>()
                .map(BatchError::exit_code)
                .unwrap_or(EXIT_FAILED_PAYLOADS);
            ExitCode::from(code)
        }
    }
}

fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("rota_batch={}", log.level).into());
    let registry = tracing_subscriber::registry().with(filter);

    if log.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run(cli: Cli, config: Config) -> anyhow::Result<RunReport> {
    info!("Starting Rota Batch");

    let payloads = source::load_payloads(&cli.input_file)
        .await
        .context("loading payloads")?;
    let proxies = source::load_proxies(&cli.proxies_file)
        .await
        .context("loading proxies")?;
    info!("Loaded {} payloads and {} proxies", payloads.len(), proxies.len());
    if payloads.is_empty() {
        warn!("Input file {} has no payloads", cli.input_file.display());
    }

    let transport = Arc::new(HttpTransport::new(config.transport.clone()));
    let executor = RequestExecutor::new(transport, proxies, ExecutorConfig::from(&config.batch))
        .context("building request executor")?;

    let sink = FileSink::open(&cli.output_file, config.sink.format)
        .await
        .context("opening output file")?;

    let scheduler = Scheduler::new(
        Arc::new(executor),
        Arc::new(sink),
        SchedulerConfig::from(&config.batch),
    )?;

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_task = tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, finishing in-flight requests");
        let _ = shutdown_tx.send(true);
    });

    let report = scheduler.run_until(payloads, shutdown_rx).await;
    signal_task.abort();

    Ok(report)
}

fn log_summary(report: &RunReport) {
    for entry in &report.proxy_usage {
        info!(
            slot = entry.slot,
            proxy = %entry.proxy,
            attempts = entry.counts.attempts,
            successes = entry.counts.successes,
            failures = entry.counts.failures,
            "Proxy usage"
        );
    }

    for (result, failure) in report.failures() {
        error!("Failed: {} ({})", result.payload, failure);
    }

    info!(
        run_id = %report.run_id,
        "Rota Batch finished: {}/{} payloads succeeded",
        report.succeeded(),
        report.total()
    );
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
