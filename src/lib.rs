//! camhub - ONVIF camera discovery and live MJPEG streaming
//!
//! ## Architecture
//!
//! 1. DiscoveryEngine - WS-Discovery probe rounds over UDP broadcast
//! 2. CameraRegistry - in-memory camera records (discovered / connected / error / offline)
//! 3. DeviceAdapter - ONVIF Media resolution of a camera's RTSP stream URI
//! 4. StreamManager - one live capture per camera, MJPEG frame sequences
//!
//! ## Design Principles
//!
//! - The registry owns record state; the stream manager owns capture handles
//! - Both share one handle table, locked in a fixed order (handles → records)
//! - No lock is held across an await; session cleanup is tied to the frame sequence's lifetime

pub mod camera_registry;
pub mod device_adapter;
pub mod discovery;
pub mod error;
pub mod state;
pub mod stream_manager;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
pub use state::{AppConfig, AppState};
