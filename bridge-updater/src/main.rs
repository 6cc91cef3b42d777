//! Consume update messages from the bus and apply them to the Solr index.
//!
//! Exit codes: 1 when the configuration is missing or invalid, 2 when the
//! message broker cannot be reached at startup.
use std::process::ExitCode;
use std::time::Duration;

use envconfig::Envconfig;
use tokio::signal::unix::SignalKind;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bridge_common::health::HealthRegistry;
use bridge_common::kafka_consumer::UpdateConsumer;
use bridge_common::metrics::{serve, setup_operational_router};
use bridge_common::solr::SolrClient;
use bridge_updater::config::Config;
use bridge_updater::worker::{SolrUpdater, UpdateWorker};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = match Config::init_from_env() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("invalid configuration: {error}");
            return ExitCode::from(1);
        }
    };

    let solr = match SolrClient::new(&config.solr_url, config.request_timeout.0) {
        Ok(solr) => solr,
        Err(error) => {
            eprintln!("invalid configuration: {error}");
            return ExitCode::from(1);
        }
    };

    let consumer = match UpdateConsumer::new(&config.kafka) {
        Ok(consumer) => consumer,
        Err(error) => {
            eprintln!("problem connecting to message broker: {error}");
            return ExitCode::from(2);
        }
    };

    let liveness = HealthRegistry::new("liveness");
    let worker_liveness = liveness.register("worker", Duration::from_secs(60));

    let bind = config.bind();
    let router = setup_operational_router(liveness);
    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    });

    let worker = UpdateWorker::new(
        consumer,
        SolrUpdater::new(solr),
        config.max_concurrent_jobs,
        worker_liveness,
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        signal_token.cancel();
    });

    info!("waiting for updates");
    worker.run(shutdown).await;
    ExitCode::SUCCESS
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())
        .expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
}
