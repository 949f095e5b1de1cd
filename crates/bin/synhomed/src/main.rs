//! # synhomed — synhome daemon
//!
//! Composition root that wires adapters, the device registry and the
//! command router together, then runs until interrupted.
//!
//! ## Responsibilities
//! - Load configuration (config file, env vars)
//! - Install the `tracing` subscriber
//! - Construct the configured adapters
//! - Build the device registry and the command router
//! - Start status ingestion, connect adapters and run discovery
//! - Handle graceful shutdown (Ctrl-C)
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer — no domain logic belongs here.

mod adapters;
mod config;

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use synhome_app::event_bus::InProcessEventBus;
use synhome_app::ingest::spawn_status_ingestion;
use synhome_app::ports::Adapter;
use synhome_app::registry::DeviceRegistry;
use synhome_app::router::CommandRouter;
use synhome_domain::event::DeviceEvent;

use config::{Config, ConfigError};

const EVENT_BUS_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.logging.filter))
        .init();

    // Adapters
    let adapters = adapters::build_all(&config.adapters)?;

    // Registry
    let registry = DeviceRegistry::from_catalog(&config.catalog, &config.status_maps())
        .map_err(ConfigError::from)?;
    tracing::info!(
        devices = registry.len(),
        adapters = adapters.len(),
        "registry built"
    );

    // Event bus
    let event_bus = InProcessEventBus::new(EVENT_BUS_CAPACITY);
    let events = tokio::spawn(log_events(event_bus.subscribe()));

    // Router
    let router = Arc::new(
        adapters
            .into_iter()
            .fold(CommandRouter::new(registry, event_bus), CommandRouter::with_adapter),
    );
    let ingestion: Vec<_> = router
        .adapters()
        .map(|adapter| spawn_status_ingestion(Arc::clone(&router), Arc::clone(adapter)))
        .collect();

    for adapter in router.adapters() {
        start(adapter.as_ref(), &router.registry()).await;
    }

    tracing::info!("synhomed running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    for adapter in router.adapters() {
        adapter.disconnect().await;
    }
    // Disconnecting ends each adapter's status stream.
    for task in ingestion {
        if let Err(err) = task.await {
            tracing::warn!(error = %err, "status ingestion ended abnormally");
        }
    }
    events.abort();
    Ok(())
}

/// Connect `adapter` and log what it discovers. Failures are logged; the
/// adapter keeps reconnecting in the background when configured to.
async fn start(adapter: &dyn Adapter, registry: &DeviceRegistry) {
    let adapter_id = adapter.id();
    if let Err(err) = adapter.connect().await {
        tracing::warn!(adapter_id, error = %err, "adapter not connected");
        return;
    }
    let devices = match adapter.discover_devices().await {
        Ok(devices) => devices,
        Err(err) => {
            tracing::warn!(adapter_id, error = %err, "discovery failed");
            return;
        }
    };
    for device in &devices {
        tracing::info!(
            adapter_id,
            external_device_id = %device.device_id,
            device_type = device.device_type.as_deref().unwrap_or("unknown"),
            "device discovered"
        );
    }
    for binding in registry.bindings_of(adapter_id) {
        if !devices
            .iter()
            .any(|device| device.device_id == binding.external_device_id)
        {
            tracing::warn!(
                adapter_id,
                device_id = %binding.device_id,
                external_device_id = %binding.external_device_id,
                "bound device not reported by discovery"
            );
        }
    }
}

async fn log_events(mut events: broadcast::Receiver<DeviceEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => tracing::debug!(?event, "device event"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event log lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
