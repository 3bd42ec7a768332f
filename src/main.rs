//! Ro Charging Engine
//!
//! Online charging for IMS calls over Diameter Ro. This binary wires the
//! engine to the in-memory simulated charging system and call layer, which
//! is enough to exercise reservations, reauthorization and teardown end to
//! end. Optional PostgreSQL persistence keeps live sessions across restarts.

mod simulator;

use anyhow::Context;
use ro_core::config::{AppConfig, DbMode};
use ro_core::traits::SessionStore;
use ro_core::SystemClock;
use ro_db::{create_pool, run_migrations, PgSessionRepository};
use ro_services::ChargingEngine;
use simulator::{SimulatedCallLayer, SimulatedChargingSystem};
use std::env;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging
fn init_tracing() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "ro_charging={},ro_services={},ro_diameter={},ro_db={},sqlx=warn",
            log_level, log_level, log_level, log_level
        ))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}

/// Connect the session store when the database mode asks for one
async fn connect_store(config: &AppConfig) -> anyhow::Result<Option<Arc<dyn SessionStore>>> {
    if config.database.mode == DbMode::None {
        return Ok(None);
    }
    let Some(url) = config.database.url.as_deref() else {
        warn!(mode = ?config.database.mode, "Database mode set without a URL, persistence disabled");
        return Ok(None);
    };

    info!("Connecting to database...");
    let pool = create_pool(url, Some(config.database.max_connections))
        .await
        .context("Failed to create database pool")?;
    run_migrations(&pool)
        .await
        .context("Failed to apply database migrations")?;
    let store: Arc<dyn SessionStore> = Arc::new(PgSessionRepository::new(pool));
    Ok(Some(store))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting Ro Charging Engine v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load().context("Failed to load configuration")?;
    info!(
        origin_host = %config.diameter.origin_host,
        destination_realm = %config.diameter.destination_realm,
        service_context = %config.diameter.service_context_id(),
        "Diameter identity configured"
    );

    let store = connect_store(&config).await?;

    let ocs = Arc::new(SimulatedChargingSystem::new(&config.simulator));
    let calls = Arc::new(SimulatedCallLayer::new());
    let engine = Arc::new(ChargingEngine::new(
        config.clone(),
        ocs,
        Arc::clone(&calls),
        Arc::new(SystemClock),
        store,
    ));

    match engine.rehydrate().await {
        Ok(restored) if restored > 0 => info!(restored, "Resumed sessions from the database"),
        Ok(_) => {}
        Err(e) => error!("Failed to rehydrate sessions: {}", e),
    }

    let ticker = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.run().await })
    };

    let traffic = CancellationToken::new();
    let simulation = tokio::spawn(simulator::run_calls(
        Arc::clone(&engine),
        calls,
        config.simulator.calls.clone(),
        traffic.clone(),
    ));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("Shutdown signal received");

    // Hang up live calls first so their STOPs go out before the engine drains
    traffic.cancel();
    if let Err(e) = simulation.await {
        error!("Simulation task failed: {}", e);
    }

    engine.shutdown().await;
    if let Err(e) = ticker.await {
        error!("Timer loop task failed: {}", e);
    }

    let stats = serde_json::to_string(&engine.stats()).unwrap_or_default();
    info!(stats = %stats, "Final charging statistics");
    Ok(())
}
