//! DeviceAdapter - video source resolution for discovered cameras
//!
//! ## Responsibilities
//!
//! - Resolve `address + credentials` to a pullable video-source URL
//! - Classify failures (unreachable / authentication / resolution)
//!
//! The registry only sees the [`DeviceAdapter`] trait; [`OnvifAdapter`] is the
//! production implementation speaking ONVIF Media over SOAP.

mod onvif;
pub mod ws_security;
pub mod xml;

pub use onvif::{with_credentials, OnvifAdapter};

use async_trait::async_trait;

/// Adapter-level failures, surfaced on the camera record as `status=error`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// Transport failure reaching the management endpoint
    #[error("Device unreachable: {0}")]
    DeviceUnreachable(String),

    /// Camera rejected the credentials
    #[error("Authentication failed: {0}")]
    AuthenticationFailure(String),

    /// Camera answered but no stream URI could be derived
    #[error("Resolution failed: {0}")]
    ResolutionFailure(String),
}

/// Resolves the live video source for one camera
#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    async fn resolve(
        &self,
        address: &str,
        username: &str,
        password: &str,
    ) -> Result<String, ResolveError>;
}
