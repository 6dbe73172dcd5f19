//! DomiSafe - Edge Monitoring Agent
//!
//! Polls environmental and intrusion sensors, publishes telemetry to the
//! cloud broker, buffers readings locally while offline and drains the
//! buffer into the remote database once the link is back.

mod audit;
mod channel;
mod config;
mod db;
mod devices;
mod dispatch;
mod scheduler;
mod security;
mod state;

#[cfg(test)]
mod testutil;

use audit::AuditLog;
use channel::{feeds, MqttChannel, MqttSettings, Publisher};
use config::AgentConfig;
use db::{LocalStore, PgRemoteStore, RemoteStore};
use devices::{
    release_quietly, Actuators, LogAlertSink, RelayBank, SimulatedCamera, SimulatedEnvSensor,
    SimulatedSecuritySensor,
};
use dispatch::CommandDispatcher;
use scheduler::{CloudSyncWorker, CollectionLoop, Scheduler, Sensors, Timings};
use security::AlertResponder;
use state::ModeState;

use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("domisafe=info".parse()?))
        .init();

    // Load configuration
    let cfg = AgentConfig::load()?;
    tracing::info!("Starting DomiSafe agent...");
    tracing::info!("Using local database at {}", cfg.local_db_path.display());

    // Local buffer
    let store = LocalStore::open_or_degraded(&cfg.local_db_path)?;
    tracing::info!("Database initialized successfully");

    let audit = match AuditLog::open(&cfg.log_dir) {
        Ok(log) => Some(Arc::new(log)),
        Err(e) => {
            tracing::error!("Cannot open audit logs in {}: {}", cfg.log_dir.display(), e);
            None
        }
    };

    let mut scheduler = Scheduler::new(cfg.shutdown_timeout());

    // Broker link
    let channel = Arc::new(MqttChannel::new(&MqttSettings::from(&cfg)));
    let inbound = channel.take_inbound();
    let stop = scheduler.stop_signal();
    match channel.connect(stop) {
        Ok(handle) => scheduler.track("channel", handle),
        Err(e) => tracing::error!("Channel: Failed to start network loop: {}", e),
    }
    channel.subscribe(&feeds::CONTROL);
    let publisher: Arc<dyn Publisher> = channel.clone();

    // Drivers
    let mode = Arc::new(ModeState::default());
    let actuators: Arc<Mutex<Box<dyn Actuators>>> = Arc::new(Mutex::new(Box::new(RelayBank::new())));
    let responder = Arc::new(AlertResponder::new(
        Box::new(SimulatedCamera::default()),
        Arc::new(LogAlertSink::from_config(&cfg)),
        cfg.camera_enabled,
        cfg.image_dir.clone(),
        cfg.capture_cooldown(),
        cfg.alert_cooldown(),
    ));

    // Command dispatcher
    if let Some(inbound) = inbound {
        let dispatcher = CommandDispatcher::new(
            mode.clone(),
            actuators.clone(),
            responder.clone(),
            publisher.clone(),
            audit.clone(),
        );
        let stop = scheduler.stop_signal();
        scheduler.track("dispatcher", tokio::spawn(dispatcher.run(inbound, stop)));
    }

    // Runloops
    scheduler.start_collection(CollectionLoop::new(
        Timings::from(&cfg),
        mode.clone(),
        Sensors {
            env: Box::new(SimulatedEnvSensor::new()),
            security: Box::new(SimulatedSecuritySensor::default()),
        },
        store.clone(),
        publisher.clone(),
        responder.clone(),
        audit,
    ));

    match cfg.remote_database_url.as_deref().map(PgRemoteStore::connect_lazy) {
        Some(Ok(remote)) => {
            if let Err(e) = remote.ensure_schema().await {
                tracing::warn!("CloudSync: Could not prepare remote tables: {}", e);
            }
            let remote: Arc<dyn RemoteStore> = Arc::new(remote);
            scheduler.start_sync(
                CloudSyncWorker::new(store, remote, publisher),
                cfg.sync_initial_delay(),
                cfg.sync_interval(),
            );
        }
        Some(Err(e)) => tracing::error!("CloudSync: Invalid remote database URL ({}), cloud sync disabled", e),
        None => tracing::warn!("NEON_DATABASE_URL not set, cloud sync disabled"),
    }

    tracing::info!("DomiSafe running in {} mode. Press Ctrl+C to stop.", mode.get());
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    // Orderly shutdown
    if let Some(mut runloop) = scheduler.shutdown().await {
        runloop.release();
    }
    {
        let mut actuators = actuators.lock().unwrap_or_else(|e| e.into_inner());
        release_quietly(actuators.as_mut());
    }
    responder.release_camera();

    tracing::info!("Stopped.");
    Ok(())
}
