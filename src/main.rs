//! camhub - ONVIF camera discovery daemon
//!
//! Main entry point: loads configuration, starts the discovery loop and
//! releases every live stream on Ctrl-C.

use camhub::state::{AppConfig, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camhub=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting camhub v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::default();
    tracing::info!(
        discovery_interval_sec = config.discovery_interval.as_secs(),
        discovery_target = %config.discovery_target,
        onvif_port = config.onvif_port,
        ffmpeg = %config.ffmpeg_path,
        credentials_configured = config.default_credentials.is_some(),
        "Configuration loaded"
    );

    let state = AppState::new(config)?;

    if !state.registry.has_credentials() {
        tracing::warn!(
            "CAMERA_USERNAME / CAMERA_PASSWORD not set; discovery stays idle until credentials are provided"
        );
    }

    let discovery = state.spawn_discovery();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    discovery.abort();
    state.shutdown();

    for record in state.registry.snapshot() {
        tracing::debug!(
            address = %record.address,
            status = %record.status,
            last_seen = %record.last_seen,
            "Known camera at shutdown"
        );
    }

    Ok(())
}
