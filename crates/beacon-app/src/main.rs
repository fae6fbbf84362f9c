//! Beacon application binary - composition root.
//!
//! Ties the Beacon crates into a single executable:
//! 1. Load configuration from TOML (CLI flags override it)
//! 2. Open the SQLite attribute and event stores
//! 3. Build and initialize the attribute registry
//! 4. Run simulated producers on blocking threads
//! 5. Harvest the event buffer on an interval until producers finish,
//!    the run duration elapses, or Ctrl-C is pressed

mod cli;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rand::Rng;

use beacon_core::error::BeaconError;
use beacon_core::store::{AttributeStore, EventStore};
use beacon_core::{
    AttributeRegistry, AttributeValue, BeaconConfig, DeviceInformation, EventCategory,
    HarvestPayload, HttpTransaction, InMemoryAttributeStore, InMemoryEventStore,
};
use beacon_storage::{Database, SqliteAttributeStore, SqliteEventStore};

use cli::CliArgs;

const SCREENS: &[&str] = &["Home", "Search", "Cart", "Checkout", "Settings"];
const HOSTS: &[&str] = &["api.example.com", "cdn.example.com", "auth.example.com"];

/// Record `count` randomized events and attribute updates.
///
/// Runs on a blocking thread; every registry call is synchronous.
fn simulate_producer(registry: &AttributeRegistry, producer: usize, count: usize) -> usize {
    let mut rng = rand::rng();
    let mut accepted = 0;

    for sequence in 0..count {
        let screen = SCREENS[rng.random_range(0..SCREENS.len())];
        let result = match rng.random_range(0..10) {
            0..=3 => {
                let mut attributes = HashMap::new();
                attributes.insert("producer".to_string(), AttributeValue::from(producer));
                attributes.insert("sequence".to_string(), AttributeValue::from(sequence));
                attributes.insert("screen".to_string(), AttributeValue::from(screen));
                registry.record_event("ScreenView", &attributes)
            }
            4 => {
                let mut attributes = HashMap::new();
                attributes.insert("name".to_string(), AttributeValue::from("order"));
                attributes.insert(
                    "total".to_string(),
                    AttributeValue::from(rng.random_range(1.0..500.0)),
                );
                registry.record_custom_event("Purchase", &attributes)
            }
            5 => registry.record_breadcrumb(screen, &HashMap::new()),
            6 => registry.record_interaction(screen, rng.random_range(0.05..3.0)),
            7 | 8 => registry
                .create_network_request_events(&random_transaction(&mut rng, producer, sequence))
                .map(|_| ()),
            _ => registry.increment_attribute("actions", 1.0, true),
        };

        match result {
            Ok(()) => accepted += 1,
            Err(BeaconError::EventDropped { reason }) => {
                tracing::trace!(producer, sequence, %reason, "Event not buffered");
            }
            Err(e) => tracing::debug!(producer, sequence, error = %e, "Producer call rejected"),
        }
    }

    accepted
}

fn random_transaction(rng: &mut impl Rng, producer: usize, sequence: usize) -> HttpTransaction {
    let host = HOSTS[rng.random_range(0..HOSTS.len())];
    let (status_code, error_code) = match rng.random_range(0..20) {
        0 => (0, -1009),
        1 => (404, 0),
        2 => (500, 0),
        _ => (200, 0),
    };
    let mut params = BTreeMap::new();
    params.insert("content_type".to_string(), "application/json".to_string());

    HttpTransaction {
        url: format!("https://{}/users/{}/items/{}", host, producer, sequence),
        http_method: if rng.random_bool(0.8) { "GET" } else { "POST" }.to_string(),
        status_code,
        error_code,
        total_time: rng.random_range(0.01..2.0),
        bytes_sent: rng.random_range(0..2048),
        bytes_received: rng.random_range(0..65536),
        wan_type: "wifi".to_string(),
        app_data: None,
        response_body: (status_code >= 400).then(|| r#"{"error":"not available"}"#.to_string()),
        params,
    }
}

/// Print a one-line JSON summary of a harvest.
fn report_harvest(registry: &AttributeRegistry, payload: &HarvestPayload) {
    let mut by_type: BTreeMap<&str, usize> = BTreeMap::new();
    for event in &payload.events {
        *by_type.entry(event.event_type()).or_default() += 1;
    }
    let buffer = registry.event_buffer();
    let summary = serde_json::json!({
        "events": payload.events.len(),
        "session_attributes": payload.session_attributes.len(),
        "event_types": by_type,
        "recorded": buffer.events_recorded(),
        "evicted": buffer.events_evicted(),
        "dropped": buffer.events_dropped(),
    });
    println!("{}", summary);

    if tracing::enabled!(tracing::Level::TRACE) {
        match payload.to_json() {
            Ok(json) => tracing::trace!(payload = %json, "Harvest payload"),
            Err(e) => tracing::warn!(error = %e, "Failed to serialize harvest payload"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let config = BeaconConfig::load_or_default(&config_file);

    // Tracing.
    let log_level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .init();

    tracing::info!("Starting Beacon v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    // Storage.
    let (attribute_store, event_store): (Arc<dyn AttributeStore>, Arc<dyn EventStore>) =
        if args.in_memory {
            tracing::info!("Using in-memory stores");
            (
                Arc::new(InMemoryAttributeStore::new()),
                Arc::new(InMemoryEventStore::new()),
            )
        } else {
            let db_path = args.resolve_database_path(&config.storage.database_path);
            let db = Arc::new(Database::new(&db_path)?);
            tracing::info!(location = db.location(), "SQLite database opened");
            (
                Arc::new(SqliteAttributeStore::new(Arc::clone(&db))),
                Arc::new(SqliteEventStore::new(db)),
            )
        };

    // Registry.
    let harvest_secs = args.resolve_harvest_interval(config.events.harvest_interval_secs);
    let registry = Arc::new(
        AttributeRegistry::new(
            config,
            attribute_store,
            Arc::new(DeviceInformation::from_host()),
        )
        .with_event_store(event_store),
    );
    registry.initialize();

    if let Err(e) = registry.set_attribute("simulator", true, false) {
        tracing::warn!(error = %e, "Failed to set simulator attribute");
    }
    if let Err(e) = registry.internal_record_event(
        "SessionStart",
        EventCategory::Session,
        None,
        &[],
    ) {
        tracing::warn!(error = %e, "Failed to record session start");
    }

    // === Producers ===

    let producers: Vec<_> = (0..args.producers)
        .map(|producer| {
            let registry = Arc::clone(&registry);
            let count = args.events_per_producer;
            tokio::task::spawn_blocking(move || simulate_producer(&registry, producer, count))
        })
        .collect();
    tracing::info!(
        producers = args.producers,
        events_per_producer = args.events_per_producer,
        "Producers started"
    );

    let all_done = async {
        let mut accepted = 0;
        for handle in producers {
            match handle.await {
                Ok(n) => accepted += n,
                Err(e) => tracing::error!(error = %e, "Producer task failed"),
            }
        }
        accepted
    };
    tokio::pin!(all_done);

    let deadline = async {
        match args.duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    // === Harvest loop ===

    let mut interval = tokio::time::interval(Duration::from_secs(harvest_secs));
    interval.tick().await;
    tracing::info!(interval_secs = harvest_secs, "Harvest loop started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Some(payload) = registry.harvest() {
                    report_harvest(&registry, &payload);
                }
            }
            accepted = &mut all_done => {
                tracing::info!(accepted, "All producers finished");
                break;
            }
            _ = &mut deadline => {
                tracing::info!("Run duration elapsed");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
        }
    }

    // Final harvest of whatever is still buffered.
    registry.shutdown();
    if let Some(payload) = registry.harvest() {
        report_harvest(&registry, &payload);
    }
    tracing::info!("Beacon stopped");

    Ok(())
}
