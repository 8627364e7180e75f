use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trainq_datastore::{DataStore, HttpDataStore};
use trainq_dispatcher::child::{is_worker_child, run_worker_child};
use trainq_dispatcher::shutdown::shutdown_signal;
use trainq_dispatcher::{Dispatcher, DispatcherConfig, WorkerCommand};
use trainq_worker::{accepted_parameters, trainer};

fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    // Always stderr: a worker child's stdout carries the job protocol.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "trainq_worker=info,trainq_dispatcher=info,trainq_datastore=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if is_worker_child() {
        return run_worker_child(trainer());
    }

    match run_dispatcher() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Dispatcher failed");
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn run_dispatcher() -> anyhow::Result<()> {
    // --- Configuration ---
    let config = DispatcherConfig::from_env().context("Invalid configuration")?;
    tracing::info!(
        datastore = %config.datastore_url,
        main_service = %config.main_service,
        pool_size = config.pool_size,
        "Loaded dispatcher configuration",
    );

    // --- Coordination service ---
    let store: Arc<dyn DataStore> = Arc::new(match &config.feed_url {
        Some(feed_url) => HttpDataStore::with_feed_url(config.datastore_url.clone(), feed_url.clone()),
        None => HttpDataStore::new(config.datastore_url.clone()),
    });

    // --- Dispatcher ---
    let command = WorkerCommand::current_exe().context("Failed to locate the worker executable")?;
    let mut dispatcher = Dispatcher::new(config, accepted_parameters(), command, store)?;
    tracing::info!(worker_id = %dispatcher.worker_id(), "Dispatcher identity");

    dispatcher.run_until(shutdown_signal()).await?;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}
