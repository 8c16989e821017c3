use std::sync::Arc;

use anyhow::{Context, Result};
use facepunch_vision::OnnxExtractor;
use tracing_subscriber::EnvFilter;
use zbus::connection;

mod config;
mod dbus_interface;
mod engine;
mod identity_lock;
mod punch;
mod session;
mod store;

use config::Config;
use dbus_interface::{AppState, AttendanceService};
use punch::PunchService;
use store::AttendanceStore;

const BUS_NAME: &str = "org.facepunch.Attendance1";
const OBJECT_PATH: &str = "/org/facepunch/Attendance1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "facepunchd starting");

    let config = Config::load()?;
    tracing::info!(
        model_dir = %config.model_dir.display(),
        db_path = %config.db_path.display(),
        tolerance = config.engine.matching.tolerance,
        session_bus = config.session_bus,
        "configuration loaded"
    );

    if config.verify_models {
        facepunch_models::verify_models_dir(&config.model_dir)
            .context("model verification failed (run `facepunch setup`)")?;
        tracing::info!("model checksums verified");
    }

    let extractor = OnnxExtractor::load(&config.model_dir, config.embedding_dim)
        .context("failed to load face models")?;
    let blink_detection = extractor.has_eye_landmarks();
    if !blink_detection {
        tracing::warn!("no eye landmarks available, liveness relies on texture and motion only");
    }
    let engine = engine::spawn_engine(extractor, config.engine.quality)?;

    let store = AttendanceStore::open(&config.db_path, config.embedding_dim)
        .await
        .with_context(|| format!("failed to open {}", config.db_path.display()))?;

    let service = PunchService::new(
        engine,
        store,
        &config.engine,
        config.liveness_session_ttl(),
    );
    let session_bus = config.session_bus;
    let interface = AttendanceService {
        state: Arc::new(AppState {
            config,
            service,
            blink_detection,
        }),
    };

    let builder = if session_bus {
        connection::Builder::session()?
    } else {
        connection::Builder::system()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, interface)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    let bus = if session_bus { "session" } else { "system" };
    tracing::info!(bus, name = BUS_NAME, "facepunchd ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("facepunchd shutting down");

    Ok(())
}
