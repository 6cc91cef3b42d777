//! Watch CouchDB update notifications on stdin and announce the resulting
//! index mutations on the message bus.
//!
//! Exit codes: 1 when the configuration is missing or invalid, 2 when the
//! message broker cannot be reached at startup.
use std::process::ExitCode;
use std::time::Duration;

use envconfig::Envconfig;
use tokio::signal::unix::SignalKind;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bridge_announcer::announcer::UpdateAnnouncer;
use bridge_announcer::config::Config;
use bridge_announcer::couch::CouchClient;
use bridge_announcer::notify;
use bridge_announcer::seqstore::SequenceStore;
use bridge_common::health::HealthRegistry;
use bridge_common::lineproto::LineProtocol;
use bridge_common::metrics::{serve, setup_operational_router};
use bridge_common::sink::KafkaSink;

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

    let source = match CouchClient::new(&config.couchdb_url, config.request_timeout.0) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("invalid configuration: {error}");
            return ExitCode::from(1);
        }
    };

    let sink = match KafkaSink::new(&config.kafka) {
        Ok(sink) => sink,
        Err(error) => {
            eprintln!("problem connecting to message broker: {error}");
            return ExitCode::from(2);
        }
    };

    let liveness = HealthRegistry::new("liveness");
    let notify_liveness = liveness.register("notifications", Duration::from_secs(60));

    let bind = config.bind();
    let router = setup_operational_router(liveness);
    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    });

    let announcer = UpdateAnnouncer::new(
        source,
        sink.clone(),
        SequenceStore::new(&config.seqid_file),
        config.batch_size,
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        signal_token.cancel();
    });

    info!("waiting for updates");
    let mut protocol = LineProtocol::new();
    notify::eval_loop(&announcer, &mut protocol, shutdown, &notify_liveness).await;

    if let Err(error) = sink.flush(Duration::from_secs(10)) {
        error!(%error, "failed to flush pending messages on shutdown");
    }
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
