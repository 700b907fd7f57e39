//! spyserv agent entry point.

use anyhow::Result;
use clap::Parser;
use spyserv::{app::App, cli::Cli, config::Config, internal_metrics, logging, logging::LogHandle};
use std::process::ExitCode;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load configuration by layering sources: defaults, file, environment, and CLI args.
    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let (log_guard, log_handle) = match logging::init(&config) {
        Ok(logging) => logging,
        Err(e) => {
            eprintln!("Failed to initialize logging: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let code = match run(config, log_handle).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal: {:#}", e);
            ExitCode::FAILURE
        }
    };
    // Flush the file writer before the process ends.
    drop(log_guard);
    code
}

async fn run(config: Config, log_handle: LogHandle) -> Result<()> {
    info!("spyserv starting up...");
    info!(
        settings = %config.paths.settings.display(),
        monitored_apps = %config.paths.monitored_apps.display(),
        backend = %config.backend.base_url,
        metrics_secs = config.schedule.metrics_interval_secs,
        status_secs = config.schedule.status_interval_secs,
        "Configuration"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics_task = internal_metrics::install(&config.metrics, shutdown_rx.clone());

    let app = App::builder(config)
        .log_handle(log_handle)
        .build(shutdown_rx)
        .await?;
    info!("spyserv initialized, monitoring...");

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Termination signal received");
        shutdown_tx.send_replace(true);
    });

    let result = app.run().await;
    if let Some(handle) = metrics_task {
        handle.abort();
    }
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
