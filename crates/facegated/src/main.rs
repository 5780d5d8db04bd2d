use anyhow::{Context, Result};
use facegate_core::{Config, EmbeddingStore, FaceAuthService};
use facegate_store::SqliteBackend;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod dbus_interface;
mod engine;

const BUS_NAME: &str = "org.facegate.FaceGate1";
const OBJECT_PATH: &str = "/org/facegate/FaceGate1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facegated starting");

    let config = Config::from_env();
    config.validate().context("invalid configuration")?;

    let store = Arc::new(
        SqliteBackend::open(&config.db_path)
            .and_then(EmbeddingStore::open)
            .with_context(|| format!("failed to open face database {}", config.db_path.display()))?,
    );

    let pipeline = facegate_core::load_pipeline(&config).context("failed to load face models")?;
    let service = FaceAuthService::new(
        pipeline,
        Arc::clone(&store),
        config.match_tolerance,
        config.duplicate_tolerance,
    );
    let timeout = Duration::from_secs(config.call_timeout_secs);
    let engine = engine::spawn_engine(service, timeout).context("failed to start engine")?;

    let iface = dbus_interface::FaceGateService {
        engine,
        store,
        match_tolerance: config.match_tolerance,
        duplicate_tolerance: config.duplicate_tolerance,
    };

    let builder = if config.dbus_session {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, iface)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(
        bus = if config.dbus_session { "session" } else { "system" },
        name = BUS_NAME,
        timeout_secs = config.call_timeout_secs,
        "facegated ready"
    );

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("facegated shutting down");

    Ok(())
}
