//! Application state
//!
//! Holds all shared components and state

use crate::camera_registry::{CameraRegistry, Credentials};
use crate::device_adapter::{DeviceAdapter, OnvifAdapter};
use crate::discovery::{DiscoveryEngine, WS_DISCOVERY_PORT};
use crate::error::{Error, Result};
use crate::stream_manager::{FfmpegSource, StreamManager, VideoSource};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Delay between discovery rounds
    pub discovery_interval: Duration,
    /// WS-Discovery destination (`host:port`)
    pub discovery_target: String,
    /// How long each probe listens for responses
    pub discovery_listen_window: Duration,
    /// ONVIF device service port
    pub onvif_port: u16,
    /// Per-request timeout for ONVIF SOAP calls
    pub onvif_timeout: Duration,
    /// ffmpeg executable
    pub ffmpeg_path: String,
    /// Time allowed for the first frame of a new stream
    pub stream_open_timeout: Duration,
    /// mjpeg `-q:v` (2-31)
    pub mjpeg_quality: u8,
    /// Default camera credentials (CAMERA_USERNAME / CAMERA_PASSWORD)
    pub default_credentials: Option<Credentials>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            discovery_interval: Duration::from_secs(env_or("DISCOVERY_INTERVAL_SEC", 30)),
            discovery_target: std::env::var("DISCOVERY_TARGET")
                .unwrap_or_else(|_| format!("255.255.255.255:{}", WS_DISCOVERY_PORT)),
            discovery_listen_window: Duration::from_secs(env_or("DISCOVERY_LISTEN_SEC", 5)),
            onvif_port: env_or("ONVIF_PORT", 80),
            onvif_timeout: Duration::from_millis(env_or("ONVIF_TIMEOUT_MS", 5000)),
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            stream_open_timeout: Duration::from_secs(env_or("STREAM_OPEN_TIMEOUT_SEC", 10)),
            mjpeg_quality: env_or("MJPEG_QUALITY", 5),
            default_credentials: match (
                std::env::var("CAMERA_USERNAME"),
                std::env::var("CAMERA_PASSWORD"),
            ) {
                (Ok(username), Ok(password)) if !username.is_empty() => {
                    Some(Credentials::new(username, password))
                }
                _ => None,
            },
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.discovery_interval.is_zero() {
            return Err(Error::Config("DISCOVERY_INTERVAL_SEC must be > 0".to_string()));
        }
        if self.discovery_listen_window.is_zero() {
            return Err(Error::Config("DISCOVERY_LISTEN_SEC must be > 0".to_string()));
        }
        if self.stream_open_timeout.is_zero() {
            return Err(Error::Config("STREAM_OPEN_TIMEOUT_SEC must be > 0".to_string()));
        }
        if !(2..=31).contains(&self.mjpeg_quality) {
            return Err(Error::Config(format!(
                "MJPEG_QUALITY must be 2-31 (got {})",
                self.mjpeg_quality
            )));
        }
        if self.ffmpeg_path.trim().is_empty() {
            return Err(Error::Config("FFMPEG_PATH is empty".to_string()));
        }
        self.discovery_target_addr()?;
        Ok(())
    }

    pub fn discovery_target_addr(&self) -> Result<SocketAddr> {
        self.discovery_target.parse().map_err(|e| {
            Error::Config(format!(
                "DISCOVERY_TARGET '{}' is not host:port ({})",
                self.discovery_target, e
            ))
        })
    }
}

/// Application state shared across tasks
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// CameraRegistry (discovered cameras)
    pub registry: Arc<CameraRegistry>,
    /// StreamManager (live sessions)
    pub streams: Arc<StreamManager>,
    /// DiscoveryEngine (WS-Discovery)
    pub discovery: Arc<DiscoveryEngine>,
}

impl AppState {
    /// Build with the ONVIF adapter and ffmpeg capture
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let adapter = Arc::new(OnvifAdapter::new(config.onvif_port, config.onvif_timeout)?);
        let source = Arc::new(FfmpegSource::new(
            config.ffmpeg_path.clone(),
            config.stream_open_timeout,
            config.mjpeg_quality,
        ));
        Self::with_components(config, adapter, source)
    }

    pub fn with_components(
        config: AppConfig,
        adapter: Arc<dyn DeviceAdapter>,
        source: Arc<dyn VideoSource>,
    ) -> Result<Self> {
        let discovery = DiscoveryEngine::new()
            .with_target(config.discovery_target_addr()?)
            .with_listen_window(config.discovery_listen_window);

        let registry = Arc::new(CameraRegistry::new(adapter));
        if let Some(credentials) = config.default_credentials.clone() {
            registry.set_credentials(credentials);
        }
        let streams = Arc::new(StreamManager::new(registry.clone(), source));

        Ok(Self {
            config,
            registry,
            streams,
            discovery: Arc::new(discovery),
        })
    }

    /// Background discovery loop feeding the registry
    pub fn spawn_discovery(&self) -> JoinHandle<()> {
        let discovery = self.discovery.clone();
        let registry = self.registry.clone();
        let interval = self.config.discovery_interval;

        tokio::spawn(async move {
            let enabled = registry.clone();
            discovery
                .run_periodic(
                    interval,
                    move || enabled.has_credentials(),
                    move |found| {
                        registry.apply_discovery(&found);
                    },
                )
                .await;
        })
    }

    /// Release every live stream
    pub fn shutdown(&self) {
        let stopped = self.streams.stop_all();
        tracing::info!(stopped_streams = stopped, "Stream sessions released");
    }
}
