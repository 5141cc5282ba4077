mod config;
mod error;
mod logging;
mod models;
mod mqtt;
mod notify;
mod sensor;

use config::{SystemConfig, TriggerKind, ENV};
use error::StartupError;
use notify::NotificationDispatcher;
use sensor::IngestionEngine;

use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

static TERMINATED: AtomicUsize = AtomicUsize::new(0);

#[tokio::main]
pub async fn main() -> ExitCode {
    let _logging = logging::init();
    info!(version = sensorlog_core::CORE_VERSION, "Starting sensorlog");

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Refusing to run: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), StartupError> {
    let config = Arc::new(SystemConfig::load(Path::new(ENV.config_path()))?);
    let (dispatcher, worker) = NotificationDispatcher::new(&config.notify);
    let dispatcher = Arc::new(dispatcher);
    let worker_handle = tokio::spawn(worker.run());

    let engine = match start_engine(config.clone(), dispatcher.clone()).await {
        Ok(engine) => engine,
        Err(e) => {
            if !matches!(e, StartupError::NoActiveTable) {
                dispatcher.send(
                    "startup",
                    TriggerKind::Exceptions,
                    "Logger not started",
                    &e.to_string(),
                    None,
                );
            }
            flush_notifications(&dispatcher, worker_handle).await;
            return Err(e);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    register_shutdown_handler(shutdown_tx);

    let (sender, receiver) = mpsc::unbounded_channel();
    let (mqtt_client, eventloop) = mqtt::MqttSensorClient::new(&config.mqtt);
    let mqtt_shutdown = shutdown_rx.clone();
    let receive_loop = tokio::spawn(async move {
        mqtt_client
            .dispatch_receive_loop(eventloop, sender, mqtt_shutdown)
            .await
    });
    let ingest_loop = tokio::spawn(IngestionEngine::dispatch_ingest_loop(
        engine.clone(),
        receiver,
    ));
    let sweep_loop = tokio::spawn(IngestionEngine::dispatch_sweep_loop(
        engine.clone(),
        shutdown_rx,
    ));

    // the receive loop owns the only sender, ingestion drains once it is gone
    for (name, handle) in [
        ("receive", receive_loop),
        ("ingest", ingest_loop),
        ("sweep", sweep_loop),
    ] {
        if let Err(e) = handle.await {
            error!("{} loop failed: {}", name, e);
        }
    }

    engine.shutdown().await;
    flush_notifications(&dispatcher, worker_handle).await;
    info!("Stopped");
    Ok(())
}

async fn start_engine(
    config: Arc<SystemConfig>,
    dispatcher: Arc<NotificationDispatcher>,
) -> Result<Arc<IngestionEngine>, StartupError> {
    let pool = models::establish_db_connection(&config).await?;
    IngestionEngine::start(config, pool, dispatcher).await
}

async fn flush_notifications(dispatcher: &NotificationDispatcher, worker: JoinHandle<()>) {
    dispatcher.close();
    match tokio::time::timeout(FLUSH_TIMEOUT, worker).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Notification worker failed: {}", e),
        Err(_) => warn!("Gave up delivering pending notifications"),
    }
}

fn register_shutdown_handler(shutdown: watch::Sender<bool>) {
    let result = ctrlc::set_handler(move || {
        let count = TERMINATED.fetch_add(1, Ordering::Relaxed);
        if count >= 1 {
            warn!("Force killing");
            std::process::exit(1);
        }
        info!("Shutting down, press again to force");
        let _ = shutdown.send(true);
    });
    if let Err(e) = result {
        error!("Couldn't register signal handler: {}", e);
    }
}
